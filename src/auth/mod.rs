use crate::state::AppState;
use axum::Router;

pub mod cookie;
pub mod dto;
pub mod errors;
pub mod handlers;
pub mod password;
pub mod session;
pub mod token;
pub(crate) mod extractors;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
        .merge(handlers::user_routes())
}
