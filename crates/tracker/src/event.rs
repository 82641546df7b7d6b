//! Run events pushed by the backend, and the bus that delivers them.
//!
//! [`EventBus`] is the injected message-passing interface: subscribers
//! register for a set of event kinds, get back a [`Subscription`] holding an
//! [`UnsubscribeToken`], and receive matching events in publish order.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// `run:started`: the backend began a run for a job. A second one for the
/// same job means the backend chained a follow-up run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    pub job_id: String,
    pub run_id: String,
}

/// `run:step`: one step changed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub run_id: String,
    pub node_id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
}

/// `run:completed`: the run reached a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCompleted {
    pub run_id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunCompleted {
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "success" | "succeeded")
    }
}

/// Everything the backend pushes about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "run:started")]
    Started(RunStarted),
    #[serde(rename = "run:step")]
    Step(StepEvent),
    #[serde(rename = "run:completed")]
    Completed(RunCompleted),
}

/// Discriminant used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunEventKind {
    Started,
    Step,
    Completed,
}

impl RunEventKind {
    pub const ALL: [RunEventKind; 3] = [Self::Started, Self::Step, Self::Completed];
}

impl RunEvent {
    pub fn kind(&self) -> RunEventKind {
        match self {
            Self::Started(_) => RunEventKind::Started,
            Self::Step(_) => RunEventKind::Step,
            Self::Completed(_) => RunEventKind::Completed,
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::Started(e) => &e.run_id,
            Self::Step(e) => &e.run_id,
            Self::Completed(e) => &e.run_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle for removing a subscription from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnsubscribeToken(Uuid);

/// Receiving end of a subscription. Yields `None` once unsubscribed.
#[derive(Debug)]
pub struct Subscription {
    token: UnsubscribeToken,
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl Subscription {
    pub fn token(&self) -> UnsubscribeToken {
        self.token
    }

    /// Next event in delivery order.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    kinds: Vec<RunEventKind>,
    tx: mpsc::UnboundedSender<RunEvent>,
}

/// In-process fan-out of run events.
///
/// Per-subscriber queues are unbounded so a slow consumer never loses or
/// reorders events.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event whose kind is in `kinds`.
    pub fn subscribe(&self, kinds: &[RunEventKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Subscriber {
                    kinds: kinds.to_vec(),
                    tx,
                },
            );
        Subscription {
            token: UnsubscribeToken(id),
            rx,
        }
    }

    /// Receive every event.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&RunEventKind::ALL)
    }

    /// Drop a subscription. Its [`Subscription::recv`] then drains what was
    /// already delivered and returns `None`. Returns `false` for unknown tokens.
    pub fn unsubscribe(&self, token: UnsubscribeToken) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token.0)
            .is_some()
    }

    /// Deliver `event` to every matching subscriber; returns how many got it.
    ///
    /// Subscribers whose receiving end was dropped are pruned.
    pub fn publish(&self, event: RunEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        subscribers.retain(|_, sub| {
            if !sub.kinds.contains(&kind) {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        debug!(?kind, run_id = %event.run_id(), delivered, "published run event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
