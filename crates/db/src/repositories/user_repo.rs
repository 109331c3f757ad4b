//! Repository for the `users` table.

use moviehub_core::types::{Timestamp, UserId};
use sqlx::PgPool;

use crate::error::DbError;
use crate::models::user::{CreateUser, User};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, email, password_hash, refresh_token, refresh_token_expires_at, \
                        last_login_at, created_at, updated_at";

/// Provides credential-store operations for users.
pub struct UserRepo;

impl UserRepo {
    /// Insert a new user, returning the created row.
    ///
    /// Returns [`DbError::Duplicate`] if the email is already registered
    /// (case-insensitive).
    pub async fn create(pool: &PgPool, input: &CreateUser) -> Result<User, DbError> {
        let query = format!(
            "INSERT INTO users (email, password_hash)
             VALUES ($1, $2)
             RETURNING {COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(&input.email)
            .bind(&input.password_hash)
            .fetch_one(pool)
            .await?;
        Ok(user)
    }

    /// Find a user by internal ID.
    pub async fn find_by_id(pool: &PgPool, id: UserId) -> Result<Option<User>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    /// Find a user by email (case-insensitive -- email is the login key).
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    /// Find a user by the exact stored refresh-token value.
    pub async fn find_by_refresh_token(
        pool: &PgPool,
        refresh_token: &str,
    ) -> Result<Option<User>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE refresh_token = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(refresh_token)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    /// Record a successful login by setting `last_login_at` to now.
    pub async fn record_successful_login(pool: &PgPool, id: UserId) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Store a refresh token and its expiry, replacing any existing pair.
    ///
    /// At most one refresh token is active per user; login and registration
    /// both route through here.
    pub async fn set_refresh_token(
        pool: &PgPool,
        id: UserId,
        refresh_token: &str,
        expires_at: Timestamp,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE users SET
                refresh_token = $2,
                refresh_token_expires_at = $3,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Extend the expiry of the stored refresh token without changing its
    /// value. Used by the refresh flow (no rotation).
    pub async fn extend_refresh_token(
        pool: &PgPool,
        id: UserId,
        expires_at: Timestamp,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE users SET
                refresh_token_expires_at = $2,
                updated_at = NOW()
             WHERE id = $1 AND refresh_token IS NOT NULL",
        )
        .bind(id)
        .bind(expires_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Invalidate any active session by nulling the token/expiry pair.
    ///
    /// Idempotent: clearing an already-cleared user is not an error.
    pub async fn clear_refresh_token(pool: &PgPool, id: UserId) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE users SET
                refresh_token = NULL,
                refresh_token_expires_at = NULL,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
