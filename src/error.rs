//! Error types for the notify gateway

use std::io;

use thiserror::Error;

/// Result type alias for the notify gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Startup and service-level errors.
///
/// Request-time authentication failures never surface here; they live in
/// [`crate::auth::ValidationError`] and are collapsed into a single rejection
/// by the middleware.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unconstructible configuration (validator descriptors,
    /// key sources, server settings). Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error must abort startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        let err = Error::config("bad key source");
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Configuration error: bad key source");
    }

    #[test]
    fn internal_errors_are_not_fatal() {
        assert!(!Error::Internal("boom".to_string()).is_fatal());
    }
}
