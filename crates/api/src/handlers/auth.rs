//! Handlers for the `/auth` resource (register, login, refresh, me, logout).

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use moviehub_core::error::CoreError;
use moviehub_core::types::{Timestamp, UserId};
use moviehub_db::models::user::{CreateUser, UserProfile};
use moviehub_db::repositories::UserRepo;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::jwt::{generate_access_token, generate_refresh_token};
use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Shared message for login failures. Deliberately identical for unknown
/// email and wrong password so the response does not leak which part failed.
const INVALID_CREDENTIALS: &str = "Invalid email or password";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/auth/register`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
    pub password: String,
    pub confirm_password: String,
}

/// Request body for `POST /api/auth/login`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    pub password: String,
}

/// Request body for `POST /api/auth/refresh`.
///
/// The token field is optional at the deserialization layer so that an
/// absent field gets the same 400 response as an empty one, instead of an
/// extractor rejection.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Successful authentication response returned by register, login, and
/// refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Signed access token (JWT).
    pub token: String,
    /// Opaque refresh token. On refresh this is the same value that was
    /// presented; the token is not rotated.
    pub refresh_token: String,
    pub email: String,
    /// Access-token expiry instant.
    pub expires_at: Timestamp,
}

/// Plain message payload (logout confirmation).
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/auth/register
///
/// Create a new account. Returns access and refresh tokens so the client is
/// signed in immediately.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    validate_input(&input)?;

    if input.password != input.confirm_password {
        return Err(AppError::Core(CoreError::Validation(
            "Password and confirmation password do not match".into(),
        )));
    }

    let password_hash = hash_password(&input.password)
        .map_err(|e| AppError::InternalError(format!("Password hashing error: {e}")))?;

    // The case-insensitive unique index on email is the authority on
    // duplicates; a duplicate insert surfaces as a typed store error and
    // maps to 409.
    let create = CreateUser {
        email: input.email.clone(),
        password_hash,
    };
    let user = UserRepo::create(&state.pool, &create).await?;

    tracing::info!(user_id = %user.id, "Registered new user");

    let response = create_auth_response(&state, user.id, &user.email).await?;
    Ok(Json(response))
}

/// POST /api/auth/login
///
/// Authenticate with email + password. Issues a fresh access token and a
/// **new** refresh token, replacing any existing one (at most one active
/// refresh token per user).
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    validate_input(&input)?;

    let user = UserRepo::find_by_email(&state.pool, &input.email)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::Unauthorized(INVALID_CREDENTIALS.into())))?;

    let password_valid = verify_password(&input.password, &user.password_hash)
        .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;

    if !password_valid {
        return Err(AppError::Core(CoreError::Unauthorized(
            INVALID_CREDENTIALS.into(),
        )));
    }

    UserRepo::record_successful_login(&state.pool, user.id).await?;

    let response = create_auth_response(&state, user.id, &user.email).await?;
    Ok(Json(response))
}

/// POST /api/auth/refresh
///
/// Exchange a valid refresh token for a new access token. The refresh token
/// itself is **not rotated**: its expiry is extended and the same value is
/// returned, so duplicate in-flight refreshes never invalidate each other.
pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let refresh_token = match input.refresh_token {
        Some(token) if !token.is_empty() => token,
        _ => return Err(AppError::BadRequest("Refresh token is required".into())),
    };

    let user = UserRepo::find_by_refresh_token(&state.pool, &refresh_token)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::Unauthorized("Invalid refresh token".into())))?;

    // The CHECK constraint guarantees the expiry is present whenever a
    // token matched, but stay defensive about the Option anyway.
    let still_valid = user
        .refresh_token_expires_at
        .is_some_and(|expires_at| expires_at > Utc::now());
    if !still_valid {
        tracing::warn!(user_id = %user.id, "Refresh attempted with expired token");
        return Err(AppError::Core(CoreError::Unauthorized(
            "Refresh token expired".into(),
        )));
    }

    let access_token = generate_access_token(user.id, &user.email, &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("Token generation error: {e}")))?;

    UserRepo::extend_refresh_token(&state.pool, user.id, state.config.jwt.refresh_token_expiry())
        .await?;

    tracing::debug!(user_id = %user.id, "Access token refreshed");

    Ok(Json(AuthResponse {
        token: access_token,
        refresh_token,
        email: user.email,
        expires_at: state.config.jwt.access_token_expiry(),
    }))
}

/// GET /api/auth/me
///
/// Return the authenticated user's profile.
pub async fn me(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<UserProfile>> {
    let user = UserRepo::find_by_id(&state.pool, auth_user.user_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "User",
            id: auth_user.user_id,
        }))?;

    Ok(Json(UserProfile::from(user)))
}

/// POST /api/auth/logout
///
/// Invalidate the user's refresh token. Idempotent: logging out an
/// already-logged-out user succeeds.
pub async fn logout(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<MessageResponse>> {
    UserRepo::clear_refresh_token(&state.pool, auth_user.user_id).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".into(),
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate access + refresh tokens, persist the refresh pair, and build the
/// response. Used by register and login, which both mint a new refresh token.
async fn create_auth_response(
    state: &AppState,
    user_id: UserId,
    email: &str,
) -> AppResult<AuthResponse> {
    let access_token = generate_access_token(user_id, email, &state.config.jwt)
        .map_err(|e| AppError::InternalError(format!("Token generation error: {e}")))?;

    let refresh_token = generate_refresh_token();
    let refresh_expires_at = state.config.jwt.refresh_token_expiry();

    UserRepo::set_refresh_token(&state.pool, user_id, &refresh_token, refresh_expires_at).await?;

    Ok(AuthResponse {
        token: access_token,
        refresh_token,
        email: email.to_string(),
        expires_at: state.config.jwt.access_token_expiry(),
    })
}

/// Run `validator` derive checks and flatten failures into one message.
fn validate_input(input: &impl Validate) -> Result<(), AppError> {
    input.validate().map_err(|errors| {
        let mut messages: Vec<String> = errors
            .field_errors()
            .values()
            .flat_map(|field| field.iter())
            .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .collect();
        messages.sort();
        let message = if messages.is_empty() {
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters long")
        } else {
            messages.join("; ")
        };
        AppError::Core(CoreError::Validation(message))
    })
}
