//! Long-running services and downstream adapters.

pub mod crash_mover;
pub mod publish;
pub mod server;
pub mod storage;

/// Failure of a downstream adapter call.
///
/// The distinction drives the crash mover's retry discipline: transient
/// failures are retried with backoff, permanent failures drop the crash
/// immediately.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The call failed in a way that may succeed on retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call failed in a way retrying will not fix.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    /// Whether the crash mover should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classifies a client-side HTTP failure.
    ///
    /// Timeouts, connection resets and other transport problems are
    /// retryable; anything else (request construction, redirect loops) is
    /// not.
    pub fn from_http(error: reqwest::Error) -> Self {
        if error.is_builder() || error.is_redirect() {
            Self::Permanent(error.to_string())
        } else {
            Self::Transient(error.to_string())
        }
    }

    /// Classifies an HTTP response status.
    ///
    /// Server errors and throttling responses are retryable; client errors
    /// mean the request itself is wrong and will keep failing.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Self::Transient(format!("{context}: HTTP {status}"))
        } else {
            Self::Permanent(format!("{context}: HTTP {status}"))
        }
    }
}
