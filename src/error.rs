//! Error types for atacquire.
//!
//! One enum covers the whole pipeline. Variants split into three groups:
//! expected terminal signals (`NotFound`, `AlreadyExists`), retryable transport
//! failures (`RateLimited`, `UnexpectedStatus`, `Network`), and operation-fatal
//! problems that must reach the user (`ConfigurationMissing`, `StorageUnavailable`).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for atacquire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for atacquire.
#[derive(Debug, Error)]
pub enum Error {
    /// Identifier did not match `digits-digits-digits/yyyy-digits`.
    #[error("invalid identifier format: {0}")]
    InvalidIdentifierFormat(String),

    /// Search was requested with an empty or whitespace-only term.
    #[error("search term is required")]
    MissingSearchTerm,

    /// HTTP 404. Marks the end of a record's file sequence.
    #[error("not found (HTTP 404)")]
    NotFound,

    /// Destination file is already on disk. Not a real failure.
    #[error("file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// HTTP 429 from the remote service.
    #[error("rate limited (HTTP 429)")]
    RateLimited,

    /// Any other non-200 status.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A required setting is absent; the user has to reconfigure.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// The download root (or a file inside it) cannot be read or written.
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Headless browser failure (launch, navigation, evaluation).
    #[error("browser error: {0}")]
    Browser(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Terminal errors end a single-file attempt without retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::NotFound | Error::AlreadyExists { .. })
    }

    /// True for errors that should make the caller back off before trying again.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Error::RateLimited | Error::UnexpectedStatus(429) => true,
            Error::Browser(msg) => msg.contains("429"),
            _ => false,
        }
    }

    /// Errors the user has to act on (reconfigure, fix permissions).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigurationMissing(_) | Error::StorageUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(Error::NotFound.is_terminal());
        assert!(Error::AlreadyExists {
            path: PathBuf::from("a.pdf")
        }
        .is_terminal());
        assert!(!Error::RateLimited.is_terminal());
        assert!(!Error::UnexpectedStatus(500).is_terminal());
    }

    #[test]
    fn rate_limit_detection_from_browser_message() {
        assert!(Error::Browser("navigation failed: HTTP 429".into()).is_rate_limit());
        assert!(!Error::Browser("net::ERR_NAME_NOT_RESOLVED".into()).is_rate_limit());
        assert!(Error::RateLimited.is_rate_limit());
    }

    #[test]
    fn fatal_errors_carry_actionable_message() {
        let err = Error::ConfigurationMissing("download_dir".into());
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "configuration missing: download_dir");
    }
}
