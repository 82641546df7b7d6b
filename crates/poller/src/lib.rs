//! `poller` crate: generic long-running-operation poller.
//!
//! For callers that only hold a status URL: fetch it on a fixed interval,
//! classify each response, and stop on success, failure, timeout or teardown.

pub mod classify;
pub mod error;
pub mod poller;

pub use classify::{classify, PollProgress, PollResult, PollStatus, StepProgress};
pub use error::PollError;
pub use poller::{PollTask, PollerConfig, PollingEngine};
