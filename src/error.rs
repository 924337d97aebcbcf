//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Transport exhausted after {attempts} attempts: {source}")]
    TransportExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("CDN token error: {0}")]
    Token(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(reqwest::Error),
}

impl Error {
    /// Faults worth retrying: dropped connections, timeouts, overloaded endpoints.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Error::Transient(e.to_string())
        } else {
            Error::Http(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("connection reset".to_string()).is_transient());
        assert!(Error::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!Error::NotFound("a.txt".to_string()).is_transient());
        assert!(!Error::Backend("quota".to_string()).is_transient());
    }

    #[test]
    fn test_exhausted_carries_cause() {
        let err = Error::TransportExhausted {
            attempts: 3,
            source: Box::new(Error::Transient("connection reset".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("connection reset"));
    }
}
