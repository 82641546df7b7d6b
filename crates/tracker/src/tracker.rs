//! Live run tracking.
//!
//! `RunTracker` owns the [`RunView`] for the run currently being tracked:
//! 1. [`RunTracker::start_tracking`] adopts a run id and arms the view.
//! 2. [`RunTracker::apply`] folds push events into the view, dropping any
//!    event whose run id is not the tracked one.
//! 3. A failed run ends tracking at once. A successful one opens a grace
//!    window in which the backend may chain a follow-up run; when it closes,
//!    tracking ends.
//! 4. [`RunTracker::cancel`] ends tracking immediately and asks the backend
//!    to stop, without waiting for the answer.
//!
//! [`RunTracker::run`] drives all of this from a [`Subscription`].

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use backend::RunBackend;
use engine::WorkflowGraph;

use crate::event::{RunCompleted, RunEvent, RunStarted, StepEvent, Subscription};
use crate::history::{reconstruct_from, Run};
use crate::view::{ExecutionStatus, RunView, DEFAULT_FAILURE_MESSAGE};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long to wait after a successful completion for a chained run.
    pub grace_period: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracked run / outcome
// ---------------------------------------------------------------------------

/// The run currently being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRun {
    pub job_id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

/// How tracking ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The last run of the chain succeeded.
    Completed,
    /// The backend reported a failure.
    Failed(String),
    /// Cancelled locally.
    Cancelled,
    /// The event subscription closed while a run was still tracked.
    Disconnected,
    /// Nothing was being tracked.
    Idle,
}

// ---------------------------------------------------------------------------
// RunTracker
// ---------------------------------------------------------------------------

pub struct RunTracker {
    backend: Arc<dyn RunBackend>,
    config: TrackerConfig,
    /// Idle view of the graph; the starting point for every reconstruction.
    template: RunView,
    view: RunView,
    current: Option<TrackedRun>,
    grace_deadline: Option<Instant>,
    error: Option<String>,
    outcome: Option<RunOutcome>,
}

impl RunTracker {
    /// Snapshot `graph`'s node kinds and output wiring. Later edits to the
    /// graph need a new tracker.
    pub fn new(graph: &WorkflowGraph, backend: Arc<dyn RunBackend>, config: TrackerConfig) -> Self {
        let template = RunView::from_graph(graph);
        Self {
            backend,
            config,
            view: template.clone(),
            template,
            current: None,
            grace_deadline: None,
            error: None,
            outcome: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn view(&self) -> &RunView {
        &self.view
    }

    pub fn current_run(&self) -> Option<&TrackedRun> {
        self.current.as_ref()
    }

    pub fn current_run_id(&self) -> Option<&str> {
        self.current.as_ref().map(|r| r.run_id.as_str())
    }

    pub fn is_tracking(&self) -> bool {
        self.current.is_some()
    }

    /// Message of the last failed run, cleared when a new run starts.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Set while a successful run waits for a possible chained run.
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace_deadline
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Adopt `run_id` as the tracked run and arm the view.
    pub fn start_tracking(&mut self, job_id: impl Into<String>, run_id: impl Into<String>) {
        let run = TrackedRun {
            job_id: job_id.into(),
            run_id: run_id.into(),
            started_at: Utc::now(),
        };
        info!(job_id = %run.job_id, run_id = %run.run_id, "tracking run");

        self.current = Some(run);
        self.grace_deadline = None;
        self.error = None;
        self.outcome = None;
        self.view.arm();
    }

    /// Fold one event into the view. Returns `false` if it was stale.
    pub fn apply(&mut self, event: RunEvent) -> bool {
        match event {
            RunEvent::Started(started) => self.on_started(started),
            RunEvent::Step(step) => self.on_step(step),
            RunEvent::Completed(completed) => self.on_completed(completed),
        }
    }

    fn is_current(&self, run_id: &str) -> bool {
        self.current_run_id() == Some(run_id)
    }

    fn on_started(&mut self, started: RunStarted) -> bool {
        let Some(current) = &self.current else {
            debug!(run_id = %started.run_id, "dropping run:started, nothing tracked");
            return false;
        };
        if current.job_id != started.job_id {
            debug!(job_id = %started.job_id, "dropping run:started for another job");
            return false;
        }
        if current.run_id == started.run_id {
            return true;
        }

        info!(
            previous = %current.run_id,
            run_id = %started.run_id,
            "backend chained a follow-up run"
        );
        self.start_tracking(started.job_id, started.run_id);
        true
    }

    fn on_step(&mut self, step: StepEvent) -> bool {
        if !self.is_current(&step.run_id) {
            debug!(run_id = %step.run_id, node_id = %step.node_id, "dropping stale run:step");
            return false;
        }
        let status = ExecutionStatus::from_backend(&step.status);
        debug!(node_id = %step.node_id, ?status, "step update");
        self.view.apply_step(&step.node_id, status, step.output);
        true
    }

    fn on_completed(&mut self, completed: RunCompleted) -> bool {
        if !self.is_current(&completed.run_id) {
            debug!(run_id = %completed.run_id, "dropping stale run:completed");
            return false;
        }

        if completed.is_success() {
            debug!(run_id = %completed.run_id, grace = ?self.config.grace_period, "run completed, waiting for chained run");
            self.grace_deadline = Some(Instant::now() + self.config.grace_period);
            return true;
        }

        let message = completed
            .error
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        warn!(run_id = %completed.run_id, error = %message, "run failed");

        self.current = None;
        self.grace_deadline = None;
        self.view.fail(&message);
        self.error = Some(message.clone());
        self.outcome = Some(RunOutcome::Failed(message));
        true
    }

    /// Close the grace window: no chained run came, so tracking ends.
    /// No-op when no window is open.
    pub fn finish_grace(&mut self) {
        if self.grace_deadline.take().is_none() {
            return;
        }
        if let Some(run) = self.current.take() {
            let elapsed = Utc::now() - run.started_at;
            info!(run_id = %run.run_id, elapsed_ms = elapsed.num_milliseconds(), "run finished");
        }
        self.view.complete();
        self.outcome = Some(RunOutcome::Completed);
    }

    /// Stop tracking and ask the backend to cancel the run.
    ///
    /// Local state resets immediately; the request runs on a spawned task
    /// whose handle is returned. Late events for the cancelled run are
    /// dropped as stale. Must be called inside a Tokio runtime.
    pub fn cancel(&mut self) -> Option<JoinHandle<()>> {
        let run = self.current.take()?;
        self.grace_deadline = None;
        self.view.reset();
        self.outcome = Some(RunOutcome::Cancelled);
        info!(run_id = %run.run_id, "run cancelled locally");

        let backend = Arc::clone(&self.backend);
        Some(tokio::spawn(async move {
            if let Err(e) = backend.cancel_run(&run.run_id).await {
                warn!(run_id = %run.run_id, error = %e, "backend rejected cancellation");
            }
        }))
    }

    /// Rebuild the view of a past run from its events. Does not touch the
    /// live run.
    pub fn select_run(&self, run: &Run, events: &[RunEvent]) -> RunView {
        reconstruct_from(self.template.clone(), run, events)
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Consume events until the tracked run reaches a terminal local state,
    /// `cancel` fires, or the subscription closes.
    ///
    /// On cancellation the view resets first, then the backend request is
    /// awaited, so it has been sent by the time this returns. Its failure is
    /// only logged.
    #[instrument(skip_all, fields(run_id = ?self.current_run_id()))]
    pub async fn run(&mut self, mut events: Subscription, cancel: CancellationToken) -> RunOutcome {
        while self.is_tracking() {
            let deadline = self.grace_deadline;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if let Some(request) = self.cancel() {
                        if let Err(e) = request.await {
                            warn!(error = %e, "cancellation request task failed");
                        }
                    }
                }
                _ = grace_elapsed(deadline) => {
                    // A chained start already delivered beats the deadline.
                    while self.is_tracking() && self.grace_deadline == deadline {
                        let Some(event) = events.try_recv() else {
                            break;
                        };
                        self.apply(event);
                    }
                    if self.grace_deadline == deadline {
                        self.finish_grace();
                    }
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.apply(event);
                    }
                    None => {
                        warn!("event subscription closed while tracking");
                        return RunOutcome::Disconnected;
                    }
                },
            }
        }

        self.outcome.clone().unwrap_or(RunOutcome::Idle)
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use backend::mock::RecordingBackend;
    use backend::{BackendError, RunRequest};
    use engine::{Edge, Node, NodeKind, ResourceRef};
    use serde_json::{json, Value};

    use crate::event::EventBus;
    use crate::view::OutputDisplay;

    fn resource(id: &str) -> Node {
        Node::resource(
            id,
            ResourceRef {
                id: format!("res-{id}"),
                name: id.into(),
                price: 1.0,
                url: format!("https://{id}.test"),
                network: None,
                inputs: vec![],
            },
        )
    }

    /// T → A → O ← B ← T, plus X (transform) fed by A.
    fn graph() -> WorkflowGraph {
        let mut x = Node::new("X", NodeKind::Transform);
        x.data.transform_type = Some("pick".into());
        WorkflowGraph::new(
            vec![
                Node::new("T", NodeKind::Trigger),
                resource("A"),
                resource("B"),
                x,
                Node::new("O", NodeKind::Output),
                Node::new("P", NodeKind::Output),
            ],
            vec![
                Edge::new("T", "A"),
                Edge::new("T", "B"),
                Edge::new("A", "O"),
                Edge::new("B", "O"),
                Edge::new("A", "X"),
                Edge::new("X", "P"),
            ],
        )
    }

    fn tracker_with(backend: RecordingBackend) -> RunTracker {
        RunTracker::new(&graph(), Arc::new(backend), TrackerConfig::default())
    }

    fn step(run_id: &str, node_id: &str, status: &str, output: Value) -> RunEvent {
        RunEvent::Step(StepEvent {
            run_id: run_id.into(),
            node_id: node_id.into(),
            status: status.into(),
            output: Some(output),
        })
    }

    fn completed(run_id: &str, status: &str, error: Option<&str>) -> RunEvent {
        RunEvent::Completed(RunCompleted {
            run_id: run_id.into(),
            status: status.into(),
            error: error.map(str::to_owned),
        })
    }

    fn started(job_id: &str, run_id: &str) -> RunEvent {
        RunEvent::Started(RunStarted {
            job_id: job_id.into(),
            run_id: run_id.into(),
        })
    }

    #[test]
    fn start_tracking_arms_the_view() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");

        assert_eq!(tracker.current_run_id(), Some("r1"));
        assert_eq!(tracker.view().status("A"), Some(ExecutionStatus::Pending));
        assert_eq!(tracker.view().status("X"), Some(ExecutionStatus::Pending));
        assert_eq!(tracker.view().display("O"), Some(&OutputDisplay::Loading));
    }

    #[test]
    fn stale_events_change_nothing() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        let before = tracker.view().clone();

        assert!(!tracker.apply(step("r0", "A", "completed", json!("old"))));
        assert!(!tracker.apply(completed("r0", "failed", Some("old failure"))));
        assert!(!tracker.apply(started("other-job", "r9")));

        assert_eq!(tracker.view(), &before);
        assert_eq!(tracker.current_run_id(), Some("r1"));
        assert_eq!(tracker.error(), None);
    }

    #[test]
    fn events_before_tracking_are_dropped() {
        let mut tracker = tracker_with(RecordingBackend::new());
        assert!(!tracker.apply(step("r1", "A", "completed", json!(1))));
        assert!(!tracker.apply(started("job", "r1")));
        assert!(!tracker.is_tracking());
    }

    #[test]
    fn fan_in_merges_by_source_id() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");

        tracker.apply(step("r1", "A", "completed", json!("outputA")));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("outputA")));
        assert_eq!(tracker.view().status("A"), Some(ExecutionStatus::Completed));

        tracker.apply(step("r1", "B", "completed", json!("outputB")));
        assert_eq!(
            tracker.view().output_value("O"),
            Some(&json!({ "A": "outputA", "B": "outputB" }))
        );
    }

    #[test]
    fn failure_keeps_partial_results_and_stops_tracking() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");

        tracker.apply(step("r1", "A", "completed", json!("outputA")));
        tracker.apply(step("r1", "X", "running", Value::Null));
        tracker.apply(completed("r1", "failed", Some("X crashed")));

        assert!(!tracker.is_tracking());
        assert_eq!(tracker.error(), Some("X crashed"));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("outputA")));
        assert_eq!(
            tracker.view().display("P"),
            Some(&OutputDisplay::Error("X crashed".into()))
        );
        assert_eq!(tracker.view().status("X"), Some(ExecutionStatus::Idle));

        // A late step for the failed run is stale now.
        assert!(!tracker.apply(step("r1", "X", "completed", json!("late"))));
    }

    #[test]
    fn failure_without_message_uses_default() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(completed("r1", "error", None));
        assert_eq!(tracker.error(), Some(DEFAULT_FAILURE_MESSAGE));
    }

    #[test]
    fn success_waits_for_grace_before_resetting() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(step("r1", "A", "completed", json!("outputA")));
        tracker.apply(completed("r1", "completed", None));

        assert!(tracker.is_tracking());
        assert!(tracker.grace_deadline().is_some());

        tracker.finish_grace();

        assert!(!tracker.is_tracking());
        assert_eq!(tracker.view().status("A"), Some(ExecutionStatus::Idle));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("outputA")));
        assert_eq!(tracker.view().display("P"), Some(&OutputDisplay::NoOutput));
    }

    #[test]
    fn chained_run_rearms_tracking() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(step("r1", "A", "completed", json!("first")));
        tracker.apply(completed("r1", "success", None));

        assert!(tracker.apply(started("job", "r2")));

        assert_eq!(tracker.current_run_id(), Some("r2"));
        assert!(tracker.grace_deadline().is_none());
        assert_eq!(tracker.view().status("A"), Some(ExecutionStatus::Pending));
        assert_eq!(tracker.view().display("O"), Some(&OutputDisplay::Loading));

        // The old run id is stale from here on.
        assert!(!tracker.apply(step("r1", "B", "completed", json!("late"))));
        assert!(tracker.apply(step("r2", "B", "completed", json!("second"))));
    }

    #[test]
    fn duplicate_started_for_current_run_is_a_no_op() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(step("r1", "A", "completed", json!("kept")));

        assert!(tracker.apply(started("job", "r1")));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("kept")));
    }

    #[tokio::test]
    async fn cancel_resets_locally_even_if_backend_refuses() {
        let backend = RecordingBackend::rejecting_cancel();
        let mut tracker = tracker_with(backend.clone());
        tracker.start_tracking("job", "r1");
        tracker.apply(step("r1", "A", "running", Value::Null));

        let handle = tracker.cancel().expect("a run was tracked");

        assert!(!tracker.is_tracking());
        assert_eq!(tracker.view().status("A"), Some(ExecutionStatus::Idle));
        assert_eq!(tracker.view().display("O"), Some(&OutputDisplay::Idle));

        handle.await.unwrap();
        assert_eq!(backend.cancelled(), vec!["r1".to_string()]);

        // Late events for the cancelled run are ignored.
        assert!(!tracker.apply(step("r1", "A", "completed", json!("late"))));
        assert!(tracker.cancel().is_none());
    }

    #[test]
    fn select_run_does_not_touch_live_tracking() {
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "live");

        let past = Run {
            id: "old".into(),
            job_id: Some("job".into()),
            status: "completed".into(),
            error: None,
            created_at: None,
        };
        let view = tracker.select_run(&past, &[step("old", "A", "completed", json!("then"))]);

        assert_eq!(view.output_value("O"), Some(&json!("then")));
        assert_eq!(tracker.current_run_id(), Some("live"));
        assert_eq!(tracker.view().display("O"), Some(&OutputDisplay::Loading));
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn loop_waits_out_the_grace_window() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe_all();
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");

        bus.publish(step("r1", "A", "completed", json!("a")));
        bus.publish(step("r1", "B", "completed", json!("b")));
        bus.publish(completed("r1", "completed", None));

        let started_at = Instant::now();
        let outcome = tracker.run(subscription, CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(started_at.elapsed() >= TrackerConfig::default().grace_period);
        assert_eq!(
            tracker.view().output_value("O"),
            Some(&json!({ "A": "a", "B": "b" }))
        );
        drop(bus);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_follows_a_chained_run() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe_all();
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            publisher.publish(completed("r1", "completed", None));
            tokio::time::sleep(Duration::from_secs(1)).await;
            publisher.publish(started("job", "r2"));
            publisher.publish(step("r2", "A", "completed", json!("chained")));
            publisher.publish(completed("r2", "failed", Some("second run broke")));
        });

        let outcome = tracker.run(subscription, CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Failed("second run broke".into()));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("chained")));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_on_cancellation() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe_all();
        let backend = RecordingBackend::new();
        let mut tracker = tracker_with(backend.clone());
        tracker.start_tracking("job", "r1");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let outcome = tracker.run(subscription, cancel).await;

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(backend.cancelled(), vec!["r1".to_string()]);
        drop(bus);
    }

    #[tokio::test(start_paused = true)]
    async fn chained_start_queued_at_the_deadline_is_followed() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe_all();
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(completed("r1", "completed", None));

        // Deadline reached with the chained run's events already queued.
        tokio::time::advance(TrackerConfig::default().grace_period).await;
        bus.publish(started("job", "r2"));
        bus.publish(step("r2", "A", "completed", json!("chained")));
        bus.publish(completed("r2", "failed", Some("r2 broke")));

        let outcome = tracker.run(subscription, CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Failed("r2 broke".into()));
        assert_eq!(tracker.view().output_value("O"), Some(&json!("chained")));
    }

    #[tokio::test(start_paused = true)]
    async fn chained_success_at_the_deadline_gets_its_own_window() {
        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe_all();
        let mut tracker = tracker_with(RecordingBackend::new());
        tracker.start_tracking("job", "r1");
        tracker.apply(completed("r1", "completed", None));

        tokio::time::advance(TrackerConfig::default().grace_period).await;
        bus.publish(started("job", "r2"));
        bus.publish(completed("r2", "completed", None));

        let before = Instant::now();
        let outcome = tracker.run(subscription, CancellationToken::new()).await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(before.elapsed() >= TrackerConfig::default().grace_period);
        drop(bus);
    }

    /// Backend whose cancel request takes a while to land.
    struct SlowCancelBackend {
        landed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RunBackend for SlowCancelBackend {
        async fn create_run(&self, _request: &RunRequest) -> Result<String, BackendError> {
            Ok("run-1".into())
        }

        async fn cancel_run(&self, _run_id: &str) -> Result<(), BackendError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.landed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn cancel_request_lands_before_the_runtime_shuts_down() {
        let landed = Arc::new(AtomicBool::new(false));
        let backend = SlowCancelBackend {
            landed: Arc::clone(&landed),
        };
        let mut tracker = RunTracker::new(&graph(), Arc::new(backend), TrackerConfig::default());
        tracker.start_tracking("job", "r1");

        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let outcome = rt.block_on(tracker.run(bus.subscribe_all(), cancel));
        drop(rt);

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert!(landed.load(Ordering::SeqCst));
        assert_eq!(tracker.view().display("O"), Some(&OutputDisplay::Idle));
    }

    #[tokio::test]
    async fn loop_without_tracked_run_returns_idle() {
        let bus = EventBus::new();
        let mut tracker = tracker_with(RecordingBackend::new());
        let outcome = tracker.run(bus.subscribe_all(), CancellationToken::new()).await;
        assert_eq!(outcome, RunOutcome::Idle);
    }
}
