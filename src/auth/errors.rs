use axum::http::StatusCode;
use thiserror::Error;

use super::password::CredentialError;
use super::token::TokenError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("no active session")]
    NoSession,
    #[error("session expired")]
    SessionExpired,
    #[error(transparent)]
    StorageFailure(#[from] StoreError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("{0}")]
    Invalid(String),
}

impl AuthError {
    /// True for the outcomes that simply mean "not authenticated".
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::NoSession | AuthError::SessionExpired
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            e if e.is_auth_failure() => StatusCode::UNAUTHORIZED,
            AuthError::Invalid(_) => StatusCode::BAD_REQUEST,
            AuthError::StorageFailure(e) => crate::api::store_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
