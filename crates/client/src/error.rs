use reqwest::StatusCode;

/// Error type for all client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    /// The request never produced a response (connect, DNS, body decode).
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Reading or writing the durable session file failed.
    #[error("Session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A request body could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A token renewal failed; the local session has been cleared and the
    /// caller should route the user back to the login entry point.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Outcome of a failed refresh, broadcast to every request waiting on the
/// in-flight refresh. Must be `Clone` so a single failure can fan out to
/// all waiters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    /// No refresh token in the session store.
    #[error("No refresh token available")]
    MissingToken,

    /// The server rejected the refresh call.
    #[error("Refresh rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// The refresh call never completed (network-level failure).
    #[error("Refresh transport error: {0}")]
    Transport(String),

    /// Persisting the renewed session failed.
    #[error("Refresh storage error: {0}")]
    Storage(String),

    /// The in-flight refresh was dropped before settling.
    #[error("Refresh cancelled before completion")]
    Cancelled,
}
