//! Axum route handlers for the credential endpoints

use crate::error::ApiError;
use axum::Extension;
use axum::Json;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use credvend_common::{AccessContext, Credential, CredentialType, MetadataObjectRef, Permission};
use credvend_core::VendingCoordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type Result<T> = std::result::Result<T, ApiError>;

/// Shared state for the credential handlers
pub struct VendState {
    pub coordinator: Arc<VendingCoordinator>,
    /// Permission used when no [`AccessContext`] was attached upstream
    pub anonymous_permission: Permission,
}

/// Path of `GET .../objects/{type}/{fullName}/credentials`
#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    pub metalake: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialParams {
    #[serde(rename = "credentialType")]
    pub credential_type: Option<String>,
}

/// Success body: `{"code": 0, "credentials": [...]}`
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub code: i32,
    pub credentials: Vec<Credential>,
}

impl CredentialResponse {
    #[must_use]
    pub const fn new(credentials: Vec<Credential>) -> Self {
        Self {
            code: 0,
            credentials,
        }
    }
}

/// `GET /api/metalakes/{metalake}/objects/{type}/{fullName}/credentials`
///
/// # Errors
/// Returns `ApiError` for malformed references, unknown objects and mint
/// failures.
pub async fn get_credentials(
    State(state): State<Arc<VendState>>,
    access: Option<Extension<AccessContext>>,
    path: std::result::Result<Path<ObjectPath>, PathRejection>,
    params: std::result::Result<Query<CredentialParams>, QueryRejection>,
) -> Result<Json<CredentialResponse>> {
    let Path(path) = path?;
    let Query(params) = params?;
    let object = MetadataObjectRef::parse(&path.metalake, &path.object_type, &path.full_name)
        .map_err(credvend_common::VendError::from)?;
    let requested = params
        .credential_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(CredentialType::new);
    let access = access.map_or_else(
        || AccessContext::anonymous(state.anonymous_permission),
        |Extension(ctx)| ctx,
    );

    let credentials = state
        .coordinator
        .vend(&object, requested.as_ref(), &access)
        .await?;
    Ok(Json(CredentialResponse::new(credentials)))
}
