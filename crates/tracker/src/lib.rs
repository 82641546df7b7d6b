//! `tracker` crate: reconciles backend run events onto per-node state.
//!
//! - [`event`]: the push-event model and an in-process [`EventBus`].
//! - [`view`]: the per-node status/output view a run produces.
//! - [`tracker`]: [`RunTracker`], which owns the view for the live run.
//! - [`history`]: side-effect-free reconstruction of past runs.

pub mod event;
pub mod history;
pub mod tracker;
pub mod view;

pub use event::{EventBus, RunCompleted, RunEvent, RunEventKind, RunStarted, StepEvent, Subscription, UnsubscribeToken};
pub use history::{reconstruct_run, Run};
pub use tracker::{RunOutcome, RunTracker, TrackedRun, TrackerConfig};
pub use view::{ExecutionStatus, NodeRunState, OutputDisplay, OutputRunState, RunView};
