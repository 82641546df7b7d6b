//! Backend-level error type.

use thiserror::Error;

/// Errors returned by a [`crate::RunBackend`] or [`crate::StatusSource`].
///
/// Callers use [`BackendError::is_transient`] to decide whether a retry
/// could plausibly succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response (connection refused, DNS, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success HTTP status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the JSON we expected.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Connection problems, 429 and 5xx are worth another attempt; everything
    /// else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Request("connection refused".into()).is_transient());
        assert!(BackendError::Status { status: 503, body: String::new() }.is_transient());
        assert!(BackendError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!BackendError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!BackendError::Decode("eof".into()).is_transient());
    }
}
