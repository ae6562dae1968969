//! Built-in credential providers
//!
//! - `s3-token`, `s3-secret-key`: AWS S3 (STS `AssumeRole` / static keys)
//! - `oss-token`, `oss-secret-key`: Aliyun OSS (STS `AssumeRole` / static keys)
//! - `gcs-token`: Google Cloud Storage (downscoped OAuth2 tokens)
//! - `adls-token`, `azure-account-key`: Azure Data Lake (SAS / account key)

pub mod adls_token;
pub mod azure_account_key;
pub mod gcs_token;
pub mod oss_secret_key;
pub mod oss_token;
pub mod s3_secret_key;
pub mod s3_token;

pub use adls_token::AdlsTokenProvider;
pub use azure_account_key::AzureAccountKeyProvider;
pub use gcs_token::GcsTokenProvider;
pub use oss_secret_key::OssSecretKeyProvider;
pub use oss_token::OssTokenProvider;
pub use s3_secret_key::S3SecretKeyProvider;
pub use s3_token::S3TokenProvider;
