//! Durable client-side session storage.
//!
//! The four session fields (token, refresh token, expiry, email) live
//! together in one JSON file so that saving and clearing the session is a
//! single filesystem operation. The store is a pure state holder: no
//! network calls, no token interpretation beyond comparing the stored
//! expiry against the clock.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The client's view of an authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSession {
    /// Current signed access token, attached as a bearer credential.
    pub access_token: String,
    /// Opaque refresh token exchanged for new access tokens.
    pub refresh_token: String,
    /// Access-token expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Display email of the signed-in user.
    pub email: String,
}

impl ClientSession {
    /// Whether the stored access token is still inside its validity window.
    /// Compares against the current time with no tolerance.
    pub fn is_access_token_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }

    /// Time remaining until the access token expires (negative if already
    /// expired).
    pub fn time_until_expiry(&self) -> chrono::Duration {
        self.expires_at - Utc::now()
    }
}

/// Process-wide session holder, optionally backed by a JSON file on disk.
///
/// Mutated only by [`save`](Self::save) and [`clear`](Self::clear); readers
/// get a snapshot and must tolerate the session changing between reads (a
/// stale-but-valid token simply triggers another refresh cycle later).
pub struct SessionStore {
    path: Option<PathBuf>,
    current: Mutex<Option<ClientSession>>,
}

impl SessionStore {
    /// In-memory store with no durable backing. Used in tests and by
    /// short-lived tools that have no use for persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Mutex::new(None),
        }
    }

    /// Open a file-backed store, loading any previously persisted session.
    ///
    /// A missing file starts empty; an unreadable or corrupt file is
    /// discarded with a warning rather than failing the whole client.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ClientSession>(&bytes) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt session file");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            path: Some(path),
            current: Mutex::new(current),
        }
    }

    /// Replace the stored session, persisting it if the store is
    /// file-backed.
    pub fn save(&self, session: ClientSession) -> std::io::Result<()> {
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&session)?;
            std::fs::write(path, bytes)?;
        }
        *self.current.lock().expect("session lock poisoned") = Some(session);
        Ok(())
    }

    /// Drop the session: all four fields go together in one operation.
    /// Clearing an already-empty store is not an error.
    pub fn clear(&self) -> std::io::Result<()> {
        *self.current.lock().expect("session lock poisoned") = None;
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Snapshot of the current session, if any.
    pub fn get(&self) -> Option<ClientSession> {
        self.current.lock().expect("session lock poisoned").clone()
    }

    /// Whether a session exists and its access token has not expired.
    pub fn is_access_token_valid(&self) -> bool {
        self.get()
            .is_some_and(|session| session.is_access_token_valid())
    }
}
