use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    api::{auth_rejection, store_rejection, ApiError},
    auth::{
        dto::{LoginRequest, Registration, StatusResponse},
        extractors::AuthUser,
    },
    state::AppState,
    store::{EntityFilter, Socials, StoreError, User, UserFilter},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/socials", put(update_socials))
        .route("/me/verify-email", post(verify_email))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/admin/users/:username", delete(delete_user))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<Registration>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .sessions
        .register(payload)
        .await
        .map_err(auth_rejection)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<User>), ApiError> {
    let mut headers = HeaderMap::new();
    let user = state
        .sessions
        .login(payload.username.trim(), &payload.password, &mut headers)
        .await
        .map_err(auth_rejection)?;
    Ok((headers, Json(user)))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    request: HeaderMap,
) -> Result<(HeaderMap, Json<StatusResponse>), ApiError> {
    let mut headers = HeaderMap::new();
    state
        .sessions
        .logout(&request, &mut headers)
        .await
        .map_err(auth_rejection)?;
    Ok((headers, Json(StatusResponse { status: "logged out" })))
}

pub async fn get_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

async fn reload(state: &AppState, user_id: i64) -> Result<User, ApiError> {
    state
        .store
        .find_user(&UserFilter::by_id(user_id))
        .await
        .and_then(|u| u.ok_or_else(|| StoreError::not_found("user", user_id)))
        .map_err(store_rejection)
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn update_socials(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<Socials>,
) -> Result<Json<User>, ApiError> {
    state
        .store
        .set_user_socials(user.id, &payload)
        .await
        .map_err(store_rejection)?;
    info!("socials updated");
    Ok(Json(reload(&state, user.id).await?))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn verify_email(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<User>, ApiError> {
    state
        .store
        .verify_user_email(user.id)
        .await
        .map_err(store_rejection)?;
    info!("email verified");
    Ok(Json(reload(&state, user.id).await?))
}

/// Attribute search over users; no query parameters lists the first page.
#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let filter = UserFilter::from_params(&params).map_err(store_rejection)?;
    let users = state.store.get_users(&filter).await.map_err(store_rejection)?;
    Ok(Json(users))
}

/// Account removal; cascades to everything the user owns.
#[instrument(skip(state, caller), fields(caller = caller.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    if caller.username != username {
        warn!(%username, "attempt to delete another account");
        return Err((StatusCode::FORBIDDEN, "can only delete your own account".into()));
    }
    state
        .store
        .delete_user(caller.id)
        .await
        .map_err(store_rejection)?;
    info!(%username, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
