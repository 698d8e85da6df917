use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::api::{auth_rejection, ApiError};
use crate::state::AppState;
use crate::store::User;

/// The user behind the request's `session_key` cookie.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .sessions
            .is_authenticated(&parts.headers)
            .await
            .map(AuthUser)
            .map_err(auth_rejection)
    }
}
