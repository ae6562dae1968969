//! `s3-token`: temporary credentials from AWS STS `AssumeRole`
//!
//! The long-lived key in the catalog properties only signs the STS call.
//! Callers receive a session scoped by an inline policy to the requested
//! prefixes.

use crate::error::ProviderError;
use crate::location::group_by_bucket;
use crate::policy::{PolicyStatement, SessionPolicy};
use crate::provider::{
    CredentialInfo, CredentialProvider, MintContext, expire_in_secs, http_client,
    required_property, token_expiry,
};
use crate::signing::{SigV4Signer, percent_encode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credvend_common::{
    Credential, CredentialType, Permission, StorageConfig, StorageScope, current_time_ms,
};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const ACCESS_KEY_ID: &str = "s3-access-key-id";
pub const SECRET_ACCESS_KEY: &str = "s3-secret-access-key";
pub const ROLE_ARN: &str = "s3-role-arn";
pub const EXTERNAL_ID: &str = "s3-external-id";
pub const REGION: &str = "s3-region";
pub const TOKEN_SERVICE_ENDPOINT: &str = "s3-token-service-endpoint";
pub const TOKEN_EXPIRE_IN_SECS: &str = "s3-token-expire-in-secs";

pub const SESSION_TOKEN: &str = "s3-session-token";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_EXPIRE_IN_SECS: u64 = 3600;
const STS_API_VERSION: &str = "2011-06-15";
const S3_SCHEMES: &[&str] = &["s3", "s3a", "s3n"];

/// Fields of an `s3-token` credential
#[derive(Debug, Clone)]
pub struct S3TokenInfo {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl CredentialInfo for S3TokenInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ACCESS_KEY_ID.to_string(), self.access_key_id),
            (SECRET_ACCESS_KEY.to_string(), self.secret_access_key),
            (SESSION_TOKEN.to_string(), self.session_token),
        ])
    }
}

/// Mints `s3-token` credentials through STS
pub struct S3TokenProvider {
    credential_type: CredentialType,
    signer: SigV4Signer,
    role_arn: String,
    external_id: Option<String>,
    region: String,
    endpoint: String,
    expire_in_secs: u64,
    client: reqwest::Client,
}

impl S3TokenProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        let access_key_id = required_property(config, ACCESS_KEY_ID)?;
        let secret_access_key = required_property(config, SECRET_ACCESS_KEY)?;
        let role_arn = required_property(config, ROLE_ARN)?;
        let region = config.property(REGION).unwrap_or(DEFAULT_REGION).to_string();
        let endpoint = config
            .property(TOKEN_SERVICE_ENDPOINT)
            .map_or_else(|| format!("https://sts.{region}.amazonaws.com"), str::to_string);
        let expire_in_secs = expire_in_secs(config, TOKEN_EXPIRE_IN_SECS, DEFAULT_EXPIRE_IN_SECS)?;

        Ok(Self {
            credential_type: CredentialType::new(CredentialType::S3_TOKEN),
            signer: SigV4Signer::new(access_key_id, secret_access_key, region.clone(), "sts"),
            role_arn,
            external_id: config.property(EXTERNAL_ID).map(str::to_string),
            region,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            expire_in_secs,
            client: http_client()?,
        })
    }

    /// ARN partition of the configured region
    fn partition(&self) -> &'static str {
        if self.region.starts_with("cn-") {
            "aws-cn"
        } else if self.region.starts_with("us-gov-") {
            "aws-us-gov"
        } else {
            "aws"
        }
    }

    /// Session policy limiting the token to the scope's prefixes
    pub fn session_policy(&self, scope: &StorageScope) -> Result<SessionPolicy, ProviderError> {
        let partition = self.partition();
        let buckets = group_by_bucket(scope.locations(), S3_SCHEMES)?;

        let mut object_actions = vec!["s3:GetObject", "s3:GetObjectVersion"];
        if scope.permission() == Permission::ReadWrite {
            object_actions.extend(["s3:PutObject", "s3:DeleteObject", "s3:AbortMultipartUpload"]);
        }

        let mut policy = SessionPolicy::new("2012-10-17");
        let object_resources: Vec<String> = buckets
            .values()
            .flatten()
            .map(|loc| format!("arn:{partition}:s3:::{}/{}", loc.bucket, loc.object_pattern()))
            .collect();
        policy.add_statement(
            PolicyStatement::allow()
                .actions(object_actions)
                .resources(object_resources)
                .build(),
        );

        for (bucket, locations) in &buckets {
            let bucket_arn = format!("arn:{partition}:s3:::{bucket}");
            let mut list = PolicyStatement::allow()
                .action("s3:ListBucket")
                .resource(bucket_arn.clone());
            if locations.iter().all(|l| !l.prefix.is_empty()) {
                let prefixes: Vec<String> = locations
                    .iter()
                    .flat_map(|l| [l.prefix.clone(), l.object_pattern()])
                    .collect();
                list = list.condition("StringLike", "s3:prefix", prefixes);
            }
            policy.add_statement(list.build());
            policy.add_statement(
                PolicyStatement::allow()
                    .action("s3:GetBucketLocation")
                    .resource(bucket_arn)
                    .build(),
            );
        }

        Ok(policy)
    }

    async fn assume_role(
        &self,
        policy: &str,
        context: &MintContext,
    ) -> Result<StsCredentials, ProviderError> {
        let url = reqwest::Url::parse(&format!("{}/", self.endpoint))
            .map_err(|e| ProviderError::configuration(format!("{TOKEN_SERVICE_ENDPOINT}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ProviderError::configuration(format!(
                    "{TOKEN_SERVICE_ENDPOINT} has no host"
                )));
            }
        };

        let mut params = BTreeMap::from([
            ("Action".to_string(), "AssumeRole".to_string()),
            ("Version".to_string(), STS_API_VERSION.to_string()),
            ("RoleArn".to_string(), self.role_arn.clone()),
            ("RoleSessionName".to_string(), context.session_name()),
            ("DurationSeconds".to_string(), self.expire_in_secs.to_string()),
            ("Policy".to_string(), policy.to_string()),
        ]);
        if let Some(external_id) = &self.external_id {
            params.insert("ExternalId".to_string(), external_id.clone());
        }
        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let content_type = "application/x-www-form-urlencoded; charset=utf-8";
        let signed = self.signer.sign(
            "POST",
            &host,
            url.path(),
            &BTreeMap::new(),
            &[("content-type", content_type)],
            body.as_bytes(),
            Utc::now(),
        );

        let response = self
            .client
            .post(url)
            .header("content-type", content_type)
            .header("x-amz-date", signed.x_amz_date)
            .header("authorization", signed.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let code = quick_xml::de::from_str::<StsErrorResponse>(&text)
                .map(|e| e.error.code)
                .unwrap_or_else(|_| status.to_string());
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message: code,
            });
        }

        let parsed: AssumeRoleResponse = quick_xml::de::from_str(&text)
            .map_err(|e| ProviderError::invalid_response(e.to_string()))?;
        Ok(parsed.result.credentials)
    }
}

#[async_trait]
impl CredentialProvider for S3TokenProvider {
    fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    fn default_expiry_ms(&self) -> u64 {
        self.expire_in_secs * 1000
    }

    async fn mint(
        &self,
        scope: &StorageScope,
        context: &MintContext,
    ) -> Result<Credential, ProviderError> {
        let policy = self
            .session_policy(scope)?
            .to_json()
            .map_err(|e| ProviderError::configuration(e.to_string()))?;
        let creds = self.assume_role(&policy, context).await?;

        let expiration = DateTime::parse_from_rfc3339(creds.expiration.trim())
            .map_err(|e| ProviderError::invalid_response(format!("Expiration: {e}")))?;
        let expire_ms = u64::try_from(expiration.timestamp_millis()).unwrap_or_default();
        let expire_ms = token_expiry(expire_ms, current_time_ms())?;

        tracing::debug!(
            role = %self.role_arn,
            locations = scope.locations().len(),
            permission = %scope.permission(),
            "assumed role for s3-token"
        );

        let info = S3TokenInfo {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
        };
        Ok(Credential::new(
            self.credential_type.clone(),
            expire_ms,
            info.into_info(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: StsCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

#[derive(Debug, Deserialize)]
struct StsErrorResponse {
    #[serde(rename = "Error")]
    error: StsError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsError {
    code: String,
}
