//! Error types for the callout service

use std::io;

use thiserror::Error;

/// Result type alias for the callout service
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level errors.
///
/// These are provisioning and plumbing failures. Authorization denials are
/// [`crate::callout::CalloutError`] and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at provisioning)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key resolution failed
    #[error("Keystore error: {0}")]
    Keystore(#[from] crate::signing::KeystoreError),

    /// Signing or key decoding failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Claim token encoding/decoding failed
    #[error("Claims error: {0}")]
    Claims(#[from] nats_claims::ClaimsError),

    /// Broker connection or messaging error
    #[error("Broker error: {0}")]
    Broker(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should stop the service from starting.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Io(_))
    }
}

impl From<nkeys::error::Error> for Error {
    fn from(e: nkeys::error::Error) -> Self {
        Self::Signing(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(Error::Config("missing key".into()).is_fatal());
        assert!(!Error::Signing("bad seed".into()).is_fatal());
    }

    #[test]
    fn display_includes_category() {
        let err = Error::Broker("connection refused".into());
        assert_eq!(err.to_string(), "Broker error: connection refused");
    }
}
