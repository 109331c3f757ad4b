//! Moviehub API client.
//!
//! Wraps `reqwest` with the credential plumbing the moviehub backend
//! expects: a durable [`SessionStore`](session::SessionStore) holding the
//! current tokens, an interceptor that attaches bearer credentials and
//! transparently renews them (preemptively near expiry, reactively on 401),
//! and a process-wide single-flight gate so a burst of expired requests
//! produces exactly one refresh call.

pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod single_flight;

pub use client::{ApiClient, ApiClientBuilder};
pub use error::{ClientError, RefreshError};
pub use session::{ClientSession, SessionStore};
