//! `oss-token`: temporary credentials from Aliyun STS `AssumeRole`

use crate::error::ProviderError;
use crate::location::group_by_bucket;
use crate::policy::{PolicyStatement, SessionPolicy};
use crate::provider::{
    CredentialInfo, CredentialProvider, MintContext, expire_in_secs, http_client,
    required_property, token_expiry,
};
use crate::signing::aliyun_rpc_signature;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credvend_common::{
    Credential, CredentialType, Permission, StorageConfig, StorageScope, current_time_ms,
};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const ACCESS_KEY_ID: &str = "oss-access-key-id";
pub const SECRET_ACCESS_KEY: &str = "oss-secret-access-key";
pub const ROLE_ARN: &str = "oss-role-arn";
pub const EXTERNAL_ID: &str = "oss-external-id";
pub const REGION: &str = "oss-region";
pub const TOKEN_SERVICE_ENDPOINT: &str = "oss-token-service-endpoint";
pub const TOKEN_EXPIRE_IN_SECS: &str = "oss-token-expire-in-secs";

pub const SECURITY_TOKEN: &str = "oss-security-token";

const DEFAULT_ENDPOINT: &str = "https://sts.aliyuncs.com";
const DEFAULT_EXPIRE_IN_SECS: u64 = 3600;
const STS_API_VERSION: &str = "2015-04-01";

/// Fields of an `oss-token` credential
#[derive(Debug, Clone)]
pub struct OssTokenInfo {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub security_token: String,
}

impl CredentialInfo for OssTokenInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ACCESS_KEY_ID.to_string(), self.access_key_id),
            (SECRET_ACCESS_KEY.to_string(), self.secret_access_key),
            (SECURITY_TOKEN.to_string(), self.security_token),
        ])
    }
}

pub struct OssTokenProvider {
    credential_type: CredentialType,
    access_key_id: String,
    secret_access_key: String,
    role_arn: String,
    external_id: Option<String>,
    endpoint: String,
    expire_in_secs: u64,
    client: reqwest::Client,
}

impl OssTokenProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        let endpoint = match (config.property(TOKEN_SERVICE_ENDPOINT), config.property(REGION)) {
            (Some(endpoint), _) => endpoint.to_string(),
            (None, Some(region)) => format!("https://sts.{region}.aliyuncs.com"),
            (None, None) => DEFAULT_ENDPOINT.to_string(),
        };

        Ok(Self {
            credential_type: CredentialType::new(CredentialType::OSS_TOKEN),
            access_key_id: required_property(config, ACCESS_KEY_ID)?,
            secret_access_key: required_property(config, SECRET_ACCESS_KEY)?,
            role_arn: required_property(config, ROLE_ARN)?,
            external_id: config.property(EXTERNAL_ID).map(str::to_string),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            expire_in_secs: expire_in_secs(config, TOKEN_EXPIRE_IN_SECS, DEFAULT_EXPIRE_IN_SECS)?,
            client: http_client()?,
        })
    }

    /// RAM policy limiting the token to the scope's prefixes
    pub fn session_policy(scope: &StorageScope) -> Result<SessionPolicy, ProviderError> {
        let buckets = group_by_bucket(scope.locations(), &["oss"])?;

        let mut object_actions = vec!["oss:GetObject"];
        if scope.permission() == Permission::ReadWrite {
            object_actions.extend(["oss:PutObject", "oss:DeleteObject", "oss:AbortMultipartUpload"]);
        }

        let mut policy = SessionPolicy::new("1");
        policy.add_statement(
            PolicyStatement::allow()
                .actions(object_actions)
                .resources(buckets.values().flatten().map(|loc| {
                    format!("acs:oss:*:*:{}/{}", loc.bucket, loc.object_pattern())
                }))
                .build(),
        );

        for (bucket, locations) in &buckets {
            let mut list = PolicyStatement::allow()
                .action("oss:ListObjects")
                .resource(format!("acs:oss:*:*:{bucket}"));
            if locations.iter().all(|l| !l.prefix.is_empty()) {
                list = list.condition(
                    "StringLike",
                    "oss:Prefix",
                    locations.iter().map(|l| l.object_pattern()),
                );
            }
            policy.add_statement(list.build());
            policy.add_statement(
                PolicyStatement::allow()
                    .actions(["oss:GetBucketLocation", "oss:GetBucketInfo"])
                    .resource(format!("acs:oss:*:*:{bucket}"))
                    .build(),
            );
        }

        Ok(policy)
    }

    fn signed_params(&self, policy: String, context: &MintContext) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            ("Action".to_string(), "AssumeRole".to_string()),
            ("Format".to_string(), "JSON".to_string()),
            ("Version".to_string(), STS_API_VERSION.to_string()),
            ("AccessKeyId".to_string(), self.access_key_id.clone()),
            ("SignatureMethod".to_string(), "HMAC-SHA1".to_string()),
            ("SignatureVersion".to_string(), "1.0".to_string()),
            ("SignatureNonce".to_string(), uuid::Uuid::new_v4().to_string()),
            (
                "Timestamp".to_string(),
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
            ("RoleArn".to_string(), self.role_arn.clone()),
            ("RoleSessionName".to_string(), context.session_name()),
            ("DurationSeconds".to_string(), self.expire_in_secs.to_string()),
            ("Policy".to_string(), policy),
        ]);
        if let Some(external_id) = &self.external_id {
            params.insert("ExternalId".to_string(), external_id.clone());
        }
        let signature = aliyun_rpc_signature("POST", &params, &self.secret_access_key);
        params.insert("Signature".to_string(), signature);
        params
    }
}

#[async_trait]
impl CredentialProvider for OssTokenProvider {
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
        let policy = Self::session_policy(scope)?
            .to_json()
            .map_err(|e| ProviderError::configuration(e.to_string()))?;
        let params = self.signed_params(policy, context);

        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let code = response
                .json::<AliyunError>()
                .await
                .map(|e| e.code)
                .unwrap_or_else(|_| status.to_string());
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message: code,
            });
        }

        let parsed: AssumeRoleResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(e.to_string()))?;
        let creds = parsed.credentials;

        let expiration = DateTime::parse_from_rfc3339(creds.expiration.trim())
            .map_err(|e| ProviderError::invalid_response(format!("Expiration: {e}")))?;
        let expire_ms = u64::try_from(expiration.timestamp_millis()).unwrap_or_default();
        let expire_ms = token_expiry(expire_ms, current_time_ms())?;

        tracing::debug!(role = %self.role_arn, "assumed role for oss-token");

        let info = OssTokenInfo {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.access_key_secret,
            security_token: creds.security_token,
        };
        Ok(Credential::new(
            self.credential_type.clone(),
            expire_ms,
            info.into_info(),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    credentials: AliyunCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliyunCredentials {
    access_key_id: String,
    access_key_secret: String,
    security_token: String,
    expiration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliyunError {
    code: String,
}
