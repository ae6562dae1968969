//! Credential vending REST API.
//!
//! Provides an Axum sub-router serving the credential endpoint. The
//! authorization layer in front of it may attach an
//! [`AccessContext`](credvend_common::AccessContext) request extension;
//! requests without one get the configured anonymous permission.

pub mod error;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use credvend_common::Permission;
use credvend_core::VendingCoordinator;
use handlers::VendState;
use std::sync::Arc;

pub use error::{ApiError, ErrorResponse};
pub use handlers::CredentialResponse;

/// Build the credential router.
pub fn router(coordinator: Arc<VendingCoordinator>, anonymous_permission: Permission) -> Router {
    let state = Arc::new(VendState {
        coordinator,
        anonymous_permission,
    });

    Router::new()
        .route(
            "/api/metalakes/{metalake}/objects/{type}/{fullName}/credentials",
            get(handlers::get_credentials),
        )
        .with_state(state)
}
