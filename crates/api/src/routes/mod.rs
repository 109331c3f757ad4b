pub mod auth;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /auth/register   register (public)
/// /auth/login      login (public)
/// /auth/refresh    refresh (public, validated via refresh token)
/// /auth/me         current user (requires auth)
/// /auth/logout     logout (requires auth)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/auth", auth::router())
}
