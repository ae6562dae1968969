//! `gcs-token`: downscoped OAuth2 access tokens
//!
//! The provider keeps the service account's own access token for the life
//! of the process and refreshes it through the JWT-bearer grant when it
//! gets close to expiry. Each mint exchanges that token at Google STS for a
//! token restricted by a Credential Access Boundary to the scope's prefixes.

use crate::error::ProviderError;
use crate::location::group_by_bucket;
use crate::provider::{
    CredentialInfo, CredentialProvider, MintContext, http_client, token_expiry,
};
use async_trait::async_trait;
use credvend_common::{
    Credential, CredentialType, Permission, StorageConfig, StorageScope, current_time_ms,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

pub const SERVICE_ACCOUNT_FILE: &str = "gcs-service-account-file";
pub const SERVICE_ACCOUNT_JSON: &str = "gcs-service-account-json";
pub const TOKEN_SERVICE_ENDPOINT: &str = "gcs-token-service-endpoint";

pub const TOKEN: &str = "token";

const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com/v1/token";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// Source token lifetime requested from the JWT-bearer grant
const SOURCE_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Refresh the source token when it has less than this left
const SOURCE_REFRESH_MARGIN_MS: u64 = 5 * 60 * 1000;

/// Fields of a `gcs-token` credential
#[derive(Debug, Clone)]
pub struct GcsTokenInfo {
    pub token: String,
}

impl CredentialInfo for GcsTokenInfo {
    fn into_info(self) -> BTreeMap<String, String> {
        BTreeMap::from([(TOKEN.to_string(), self.token)])
    }
}

/// The parts of a service account JSON key we use
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// An access token and its absolute expiry
#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at_ms: u64,
}

pub struct GcsTokenProvider {
    credential_type: CredentialType,
    client_email: String,
    key_id: Option<String>,
    encoding_key: EncodingKey,
    token_uri: String,
    sts_endpoint: String,
    client: reqwest::Client,
    /// Process-lifetime identity handle
    source: Mutex<Option<AccessToken>>,
}

impl GcsTokenProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, ProviderError> {
        let raw = match (
            config.property(SERVICE_ACCOUNT_JSON),
            config.property(SERVICE_ACCOUNT_FILE),
        ) {
            (Some(json), _) => json.to_string(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ProviderError::configuration(format!("cannot read {SERVICE_ACCOUNT_FILE}: {e}"))
            })?,
            (None, None) => {
                return Err(ProviderError::MissingProperty(format!(
                    "{SERVICE_ACCOUNT_FILE} or {SERVICE_ACCOUNT_JSON}"
                )));
            }
        };

        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            ProviderError::configuration(format!("invalid service account key: {e}"))
        })?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|_| {
            ProviderError::configuration("service account private_key is not a valid RSA PEM")
        })?;

        Ok(Self {
            credential_type: CredentialType::new(CredentialType::GCS_TOKEN),
            client_email: key.client_email,
            key_id: key.private_key_id,
            encoding_key,
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            sts_endpoint: config
                .property(TOKEN_SERVICE_ENDPOINT)
                .unwrap_or(DEFAULT_STS_ENDPOINT)
                .to_string(),
            client: http_client()?,
            source: Mutex::new(None),
        })
    }

    /// Credential Access Boundary restricting a token to the scope
    fn access_boundary(scope: &StorageScope) -> Result<AccessBoundary, ProviderError> {
        let buckets = group_by_bucket(scope.locations(), &["gs"])?;
        let mut rules = Vec::new();

        for (bucket, locations) in &buckets {
            let resource = format!("//storage.googleapis.com/projects/_/buckets/{bucket}");
            let whole_bucket = locations.iter().any(|l| l.prefix.is_empty());

            let object_condition = |with_list: bool| {
                if whole_bucket {
                    return None;
                }
                let mut clauses: Vec<String> = locations
                    .iter()
                    .map(|l| {
                        format!(
                            "resource.name.startsWith('projects/_/buckets/{bucket}/objects/{}/')",
                            l.prefix
                        )
                    })
                    .collect();
                if with_list {
                    // Listing stops at a `/` boundary so `t1` never lists `t10`
                    clauses.extend(locations.iter().map(|l| {
                        format!(
                            "api.getAttribute('storage.googleapis.com/objectListPrefix', '') == '{0}' || \
                             api.getAttribute('storage.googleapis.com/objectListPrefix', '').startsWith('{0}/')",
                            l.prefix
                        )
                    }));
                }
                Some(AvailabilityCondition {
                    expression: clauses.join(" || "),
                })
            };

            rules.push(AccessBoundaryRule {
                available_permissions: vec!["inRole:roles/storage.objectViewer".to_string()],
                available_resource: resource.clone(),
                availability_condition: object_condition(true),
            });
            if scope.permission() == Permission::ReadWrite {
                rules.push(AccessBoundaryRule {
                    available_permissions: vec!["inRole:roles/storage.objectAdmin".to_string()],
                    available_resource: resource,
                    availability_condition: object_condition(false),
                });
            }
        }

        Ok(AccessBoundary {
            access_boundary: AccessBoundaryRules {
                access_boundary_rules: rules,
            },
        })
    }

    /// The service account's own token, refreshed when close to expiry
    async fn source_token(&self) -> Result<AccessToken, ProviderError> {
        let mut source = self.source.lock().await;
        let now = current_time_ms();
        if let Some(token) = source.as_ref()
            && token.expires_at_ms > now + SOURCE_REFRESH_MARGIN_MS
        {
            return Ok(token.clone());
        }

        let fresh = self.fetch_source_token(now).await?;
        tracing::info!(account = %self.client_email, "refreshed gcs service account token");
        *source = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch_source_token(&self, now_ms: u64) -> Result<AccessToken, ProviderError> {
        let iat = now_ms / 1000;
        let claims = JwtClaims {
            iss: &self.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + SOURCE_TOKEN_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key_id);
        let assertion = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ProviderError::configuration(format!("cannot sign JWT: {e}")))?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let parsed: TokenResponse = read_token_response(response).await?;

        let lifetime_ms = parsed.expires_in.unwrap_or(SOURCE_TOKEN_LIFETIME_SECS) * 1000;
        Ok(AccessToken {
            token: parsed.access_token,
            expires_at_ms: now_ms + lifetime_ms,
        })
    }

    async fn downscope(
        &self,
        source: &AccessToken,
        boundary: &AccessBoundary,
    ) -> Result<AccessToken, ProviderError> {
        let options = serde_json::to_string(boundary)
            .map_err(|e| ProviderError::configuration(e.to_string()))?;
        let now = current_time_ms();

        let response = self
            .client
            .post(&self.sts_endpoint)
            .form(&[
                ("grant_type", TOKEN_EXCHANGE_GRANT),
                ("subject_token_type", ACCESS_TOKEN_TYPE),
                ("requested_token_type", ACCESS_TOKEN_TYPE),
                ("subject_token", source.token.as_str()),
                ("options", options.as_str()),
            ])
            .send()
            .await?;
        let parsed = read_token_response(response).await?;

        // A downscoped token never outlives its source token
        let expires_at_ms = parsed
            .expires_in
            .map_or(source.expires_at_ms, |secs| {
                (now + secs * 1000).min(source.expires_at_ms)
            });
        Ok(AccessToken {
            token: parsed.access_token,
            expires_at_ms,
        })
    }
}

#[async_trait]
impl CredentialProvider for GcsTokenProvider {
    fn credential_type(&self) -> &CredentialType {
        &self.credential_type
    }

    fn default_expiry_ms(&self) -> u64 {
        SOURCE_TOKEN_LIFETIME_SECS * 1000
    }

    async fn mint(
        &self,
        scope: &StorageScope,
        _context: &MintContext,
    ) -> Result<Credential, ProviderError> {
        let boundary = Self::access_boundary(scope)?;
        let source = self.source_token().await?;
        let downscoped = self.downscope(&source, &boundary).await?;
        let expire_ms = token_expiry(downscoped.expires_at_ms, current_time_ms())?;

        let info = GcsTokenInfo {
            token: downscoped.token,
        };
        Ok(Credential::new(
            self.credential_type.clone(),
            expire_ms,
            info.into_info(),
        ))
    }
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let code = response
            .json::<OAuthError>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| status.to_string());
        return Err(ProviderError::Upstream {
            status: status.as_u16(),
            message: code,
        });
    }
    response
        .json()
        .await
        .map_err(|e| ProviderError::invalid_response(e.to_string()))
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessBoundary {
    access_boundary: AccessBoundaryRules,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessBoundaryRules {
    access_boundary_rules: Vec<AccessBoundaryRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessBoundaryRule {
    available_permissions: Vec<String>,
    available_resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    availability_condition: Option<AvailabilityCondition>,
}

#[derive(Debug, Serialize)]
struct AvailabilityCondition {
    expression: String,
}
