//! Typed error contract for the credential store.
//!
//! Failures are classified here, at the point where they occur, from the
//! database driver's structured error codes -- callers never have to parse
//! message text to find out what went wrong.

/// Error returned by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A unique constraint rejected the write (e.g. duplicate email).
    #[error("Duplicate value violates unique constraint: {constraint}")]
    Duplicate { constraint: String },

    /// Any other driver-level failure.
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl DbError {
    /// True when the error is a duplicate on the case-insensitive email key.
    pub fn is_duplicate_email(&self) -> bool {
        matches!(self, DbError::Duplicate { constraint } if constraint == "uq_users_email")
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        // PostgreSQL unique constraint violation: SQLSTATE 23505.
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return DbError::Duplicate { constraint };
            }
        }
        DbError::Sqlx(err)
    }
}
