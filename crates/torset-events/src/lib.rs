//! Event bus carrying reconciliation outcomes to external collaborators.
//!
//! The engine publishes typed events (run boundaries, per-torrent transitions
//! and a summary per run); a notifier subscribes and formats/delivers them.
//! Internally the bus is a bounded `tokio::broadcast` channel plus a replay
//! ring so late subscribers can catch up on recent history. When the channel
//! overflows, the oldest events are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

/// Sequence number assigned at publication.
pub type EventId = u64;

/// Events retained for replay, and the live channel depth.
pub const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// One failed torrent in a run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureNote {
    /// Identifier of the torrent that failed.
    pub torrent_id: String,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Summary emitted after every reconciliation pass for the notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifier of the run the summary describes.
    pub run_id: Uuid,
    /// Candidates that passed the filter.
    pub matched_count: usize,
    /// Candidates dispatched plus torrents finalised this run.
    pub acted_count: usize,
    /// Dispatch and verification failures.
    pub failed_count: usize,
    /// Per-torrent failure details.
    pub failures: Vec<FailureNote>,
}

impl RunSummary {
    /// Whether the run neither acted nor failed, so there is nothing to report.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        self.acted_count == 0 && self.failed_count == 0
    }
}

/// Typed domain events surfaced by the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A reconciliation pass started.
    RunStarted {
        /// Identifier of the run.
        run_id: Uuid,
    },
    /// A torrent was added to the destination and queued for verification.
    TorrentDispatched {
        /// Identifier of the torrent.
        torrent_id: String,
        /// Directory the torrent was added under.
        download_dir: String,
    },
    /// A dispatched torrent passed verification and was finalised.
    TorrentVerified {
        /// Identifier of the torrent.
        torrent_id: String,
    },
    /// A torrent failed dispatch or verification.
    TorrentFailed {
        /// Identifier of the torrent.
        torrent_id: String,
        /// Failure reason.
        reason: String,
    },
    /// A reconciliation pass finished (possibly partially, when cancelled).
    RunCompleted {
        /// Summary of the pass.
        summary: RunSummary,
    },
    /// A reconciliation pass could not enumerate candidates.
    RunAborted {
        /// Identifier of the run.
        run_id: Uuid,
        /// Why the pass stopped.
        reason: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for subscribers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::TorrentDispatched { .. } => "torrent_dispatched",
            Self::TorrentVerified { .. } => "torrent_verified",
            Self::TorrentFailed { .. } => "torrent_failed",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunAborted { .. } => "run_aborted",
        }
    }
}

/// An event stamped with its sequence number and publication time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Position in the bus sequence, starting at 1.
    pub id: EventId,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}

struct History {
    last_id: EventId,
    recent: VecDeque<EventEnvelope>,
    limit: usize,
}

impl History {
    fn record(&mut self, event: Event) -> EventEnvelope {
        self.last_id += 1;
        let envelope = EventEnvelope {
            id: self.last_id,
            timestamp: Utc::now(),
            event,
        };
        if self.recent.len() == self.limit {
            self.recent.pop_front();
        }
        self.recent.push_back(envelope.clone());
        envelope
    }
}

/// Cloneable handle to one in-process event bus.
#[derive(Clone)]
pub struct EventBus {
    live: broadcast::Sender<EventEnvelope>,
    history: Arc<Mutex<History>>,
}

impl EventBus {
    /// Bus whose live channel and replay ring both hold `capacity` events.
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let limit = capacity.max(1);
        Self {
            live: broadcast::channel(limit).0,
            history: Arc::new(Mutex::new(History {
                last_id: 0,
                recent: VecDeque::with_capacity(limit),
                limit,
            })),
        }
    }

    /// Bus sized with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `event` and return its sequence number. Publishing with no
    /// live subscriber still records the event for replay.
    pub fn publish(&self, event: Event) -> EventId {
        let mut history = self.history();
        let envelope = history.record(event);
        let id = envelope.id;
        // Held across send: subscribe() relies on replay and live never overlapping.
        let _ = self.live.send(envelope);
        id
    }

    /// Open a subscription. With `since`, retained events newer than that id
    /// are delivered before live ones.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        let history = self.history();
        let backlog = since.map_or_else(VecDeque::new, |since| {
            history
                .recent
                .iter()
                .filter(|envelope| envelope.id > since)
                .cloned()
                .collect()
        });
        EventStream {
            backlog,
            live: self.live.subscribe(),
        }
    }

    /// Sequence number of the most recent event, if any was published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let last_id = self.history().last_id;
        (last_id > 0).then_some(last_id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`EventBus::subscribe`].
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    live: broadcast::Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event, or `None` once every bus handle is dropped. A subscriber
    /// that falls behind the live channel skips the events it missed.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.live.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
