//! JWT access-token generation/validation and refresh-token minting.
//!
//! Access tokens are HS256-signed JWTs containing a [`Claims`] payload with a
//! fixed issuer and audience. Refresh tokens are opaque random strings with
//! no embedded claims; the server stores them verbatim as lookup keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moviehub_core::types::{Timestamp, UserId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of random bytes in a refresh token before base64 encoding.
const REFRESH_TOKEN_BYTES: usize = 64;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's id.
    pub sub: UserId,
    /// The user's email address.
    pub email: String,
    /// Unique token identifier (UUID v4); differs on every issuance.
    pub jti: String,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Not-before time (UTC Unix timestamp).
    pub nbf: i64,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
}

/// Configuration for JWT token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Fixed issuer claim, validated on every decode.
    pub issuer: String,
    /// Fixed audience claim, validated on every decode.
    pub audience: String,
    /// Access token lifetime in minutes (default: 5).
    pub access_token_expiry_mins: i64,
    /// Refresh token lifetime in days (default: 30).
    pub refresh_token_expiry_days: i64,
}

/// Default access token expiry in minutes.
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 5;
/// Default refresh token expiry in days.
const DEFAULT_REFRESH_EXPIRY_DAYS: i64 = 30;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default             |
    /// |----------------------------|----------|---------------------|
    /// | `JWT_SECRET`               | **yes**  | --                  |
    /// | `JWT_ISSUER`               | no       | `moviehub-api`      |
    /// | `JWT_AUDIENCE`             | no       | `moviehub-client`   |
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `5`                 |
    /// | `JWT_REFRESH_EXPIRY_DAYS`  | no       | `30`                |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "moviehub-api".into());
        let audience = std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "moviehub-client".into());

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        let refresh_token_expiry_days: i64 = std::env::var("JWT_REFRESH_EXPIRY_DAYS")
            .unwrap_or_else(|_| DEFAULT_REFRESH_EXPIRY_DAYS.to_string())
            .parse()
            .expect("JWT_REFRESH_EXPIRY_DAYS must be a valid i64");

        Self {
            secret,
            issuer,
            audience,
            access_token_expiry_mins,
            refresh_token_expiry_days,
        }
    }

    /// The instant at which an access token issued now would expire.
    pub fn access_token_expiry(&self) -> Timestamp {
        Utc::now() + chrono::Duration::minutes(self.access_token_expiry_mins)
    }

    /// The instant at which a refresh token issued or renewed now expires.
    pub fn refresh_token_expiry(&self) -> Timestamp {
        Utc::now() + chrono::Duration::days(self.refresh_token_expiry_days)
    }
}

/// Generate an HS256 access token for the given user.
///
/// Every call produces a distinct `jti`, so two tokens for the same user are
/// never byte-identical even when issued within the same second.
pub fn generate_access_token(
    user_id: UserId,
    email: &str,
    config: &JwtConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let exp = now + config.access_token_expiry_mins * 60;

    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        nbf: now,
        exp,
        iss: config.issuer.clone(),
        aud: config.audience.clone(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}

/// Validate and decode an access token, returning the embedded [`Claims`].
///
/// Checks the signature, issuer, audience, `exp`, and `nbf` with zero
/// clock-skew leeway. Any structural, signature, or time failure surfaces as
/// an `Err` value; nothing panics.
pub fn validate_access_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_audience(&[&config.audience]);
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;
    Ok(token_data.claims)
}

/// Generate a cryptographically random refresh token.
///
/// 64 random bytes, base64-encoded. The value carries no user information;
/// it is purely a lookup key into the credential store.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
