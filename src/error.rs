//! Error types for the sync engine

use thiserror::Error;

/// Result type alias for sync engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the sync engine
///
/// `Error` is `Clone` so a single in-flight request outcome can be handed to
/// every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed input to a pure function or validator
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Credential failed the local shape check or the access probe
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Network request exceeded its bound
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Non-2xx HTTP status
    #[error("HTTP request failed with status {status}")]
    Transport { status: u16 },

    /// Well-formed error object returned by the upstream API
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// An awaited element never appeared
    #[error("Element '{selector}' did not appear within {waited_ms}ms")]
    DeferralTimeout { selector: String, waited_ms: u64 },

    /// Work abandoned because the page is being torn down
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Persistent storage is unavailable or full
    #[error("Storage error: {0}")]
    Storage(String),

    /// Connection-level failure (DNS, reset, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether a caller may reasonably try the same operation again.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Network(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidResponse(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(Error::Timeout(10_000).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(!Error::Transport { status: 503 }.is_retryable());
        assert!(!Error::Api { code: 2, message: "Incorrect key".into() }.is_retryable());
        assert!(!Error::InvalidCredential("short".into()).is_retryable());
    }

    #[test]
    fn deferral_timeout_names_selector() {
        let e = Error::DeferralTimeout { selector: "#leaderboard".into(), waited_ms: 20_000 };
        assert!(e.to_string().contains("#leaderboard"));
    }
}
