//! Poller error type. `Display` strings are short and user-facing.

use backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    /// A status fetch failed. The detail is in the source, not the message.
    #[error("Unable to reach the server while checking status")]
    Network(#[source] BackendError),

    /// `max_attempts` fetches came back still pending.
    #[error("Request timed out")]
    Timeout,

    /// The operation itself reported failure.
    #[error("{0}")]
    Failed(String),

    /// The caller tore the poll down.
    #[error("Polling cancelled")]
    Cancelled,
}
