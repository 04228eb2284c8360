use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod cookie;
pub mod dto;
pub mod error;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
#[cfg(test)]
mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod sweep;
mod tokens;

pub use error::AuthError;
pub use services::SessionService;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
