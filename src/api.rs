use axum::http::StatusCode;
use tracing::{debug, error, warn};

use crate::auth::errors::AuthError;
use crate::store::StoreError;

/// Rejection type shared by every handler.
pub type ApiError = (StatusCode, String);

pub fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::EmptyFilter | StoreError::InvalidFilter { .. } => StatusCode::BAD_REQUEST,
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn store_rejection(e: StoreError) -> ApiError {
    let status = store_status(&e);
    if status.is_server_error() {
        error!(error = %e, "store operation failed");
        return (status, "internal error".into());
    }
    debug!(error = %e, %status, "store rejected request");
    (status, e.to_string())
}

pub fn auth_rejection(e: AuthError) -> ApiError {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, "auth operation failed");
        return (status, "internal error".into());
    }
    if e.is_auth_failure() {
        debug!(error = %e, "not authenticated");
    } else {
        warn!(error = %e, %status, "auth request rejected");
    }
    (status, e.to_string())
}
