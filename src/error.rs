//! Error taxonomy shared by every stage of a relay run.
//!
//! Pre-flight errors (`Config`, `CorruptLedger`) abort the run before any
//! network work. `Persistence` aborts the run whenever it happens. Everything
//! else is scoped to a single unit of work or a single page.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("ledger {path} is corrupt: {reason}")]
    CorruptLedger { path: PathBuf, reason: String },

    #[error("failed to persist ledger {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("source page structure changed: {0}")]
    Parse(String),

    #[error("media acquisition failed: {message}")]
    Acquire { message: String, retryable: bool },

    #[error("authentication failed for page {page}: {message}")]
    Auth { page: String, message: String },

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("deadline exceeded during {0}")]
    Timeout(String),
}

impl RelayError {
    /// Errors worth another attempt inside the same run.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Fetch(_) | RelayError::RateLimit(_) | RelayError::Publish(_) => true,
            RelayError::Acquire { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Errors that end the whole run with a non-zero exit code.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Config(_) | RelayError::CorruptLedger { .. } | RelayError::Persistence { .. }
        )
    }

    pub fn acquire(message: impl Into<String>) -> Self {
        RelayError::Acquire {
            message: message.into(),
            retryable: true,
        }
    }

    /// Media that cannot be obtained no matter how often we ask.
    pub fn unavailable(message: impl Into<String>) -> Self {
        RelayError::Acquire {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Fetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(RelayError::Fetch("timeout".into()).is_retryable());
        assert!(RelayError::RateLimit("429".into()).is_retryable());
        assert!(RelayError::Publish("500".into()).is_retryable());
        assert!(RelayError::acquire("reset").is_retryable());
        assert!(!RelayError::unavailable("no media url").is_retryable());
        assert!(!RelayError::Parse("no articles".into()).is_retryable());
        assert!(!RelayError::Auth { page: "p".into(), message: "expired".into() }.is_retryable());
        assert!(!RelayError::Timeout("publish".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classes() {
        assert!(RelayError::Config("empty".into()).is_fatal());
        assert!(RelayError::CorruptLedger { path: "x".into(), reason: "eof".into() }.is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(RelayError::Persistence { path: "x".into(), source: io }.is_fatal());
        assert!(!RelayError::Publish("boom".into()).is_fatal());
    }
}
