//! Per-run outcome record and its summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use torset_core::{AdapterErrorKind, TorrentId};
use torset_events::{FailureNote, RunSummary};
use uuid::Uuid;

use crate::filter::FilterReason;
use crate::tracker::VerificationFailure;

/// Why a candidate was passed over without evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The run was cancelled before reaching the candidate.
    Cancelled,
    /// The candidate is already awaiting verification.
    Pending,
    /// The destination id returned by the add is already being tracked.
    AlreadyTracked,
    /// An earlier candidate found the destination unreachable.
    BackendUnavailable,
}

impl SkipReason {
    /// Render the reason as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Pending => "pending",
            Self::AlreadyTracked => "already_tracked",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

/// Cause of a failed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A downloader call failed.
    Adapter(AdapterErrorKind),
    /// No readable `.torrent` file for the candidate.
    MetainfoMissing,
    /// The destination recheck did not verify the payload.
    Verification(VerificationFailure),
}

impl FailureKind {
    /// Render the kind as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adapter(kind) => kind.as_str(),
            Self::MetainfoMissing => "metainfo_missing",
            Self::Verification(reason) => reason.as_str(),
        }
    }
}

/// Where a torrent ended up in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Rejected by the filter.
    Filtered(FilterReason),
    /// Not evaluated.
    Skipped(SkipReason),
    /// Already present at the destination.
    Duplicate,
    /// Added at the destination and queued for verification.
    Dispatched,
    /// Verified and finalised.
    Done,
    /// Dispatch or verification failed.
    Failed(FailureKind),
}

impl Decision {
    /// Metric label for the decision.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Filtered(_) => "filtered",
            Self::Skipped(_) => "skipped",
            Self::Duplicate => "duplicate",
            Self::Dispatched => "dispatched",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Stage of the run that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Candidate evaluation and dispatch.
    Dispatch,
    /// Tracker poll and finalisation.
    Verification,
}

/// Outcome for one torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentOutcome {
    /// Identifier of the torrent at the source.
    pub torrent_id: TorrentId,
    /// Stage that produced the outcome.
    pub phase: Phase,
    /// What happened.
    pub decision: Decision,
    /// Error text or non-fatal notes.
    pub detail: Option<String>,
}

impl TorrentOutcome {
    pub(crate) const fn new(torrent_id: TorrentId, phase: Phase, decision: Decision) -> Self {
        Self {
            torrent_id,
            phase,
            decision,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Everything one run (or poll) did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// When the run took the lock.
    pub started_at: DateTime<Utc>,
    /// When the run released the lock.
    pub finished_at: Option<DateTime<Utc>>,
    /// Candidates enumerated at the source.
    pub candidate_count: usize,
    /// An unreachable destination stopped the run early.
    pub aborted: bool,
    /// The run observed its cancellation signal.
    pub cancelled: bool,
    /// Tracker entries polled and kept for a later pass.
    pub still_verifying: usize,
    /// Per-torrent outcomes in processing order.
    pub outcomes: Vec<TorrentOutcome>,
}

impl RunRecord {
    pub(crate) fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            candidate_count: 0,
            aborted: false,
            cancelled: false,
            still_verifying: 0,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, outcome: TorrentOutcome) {
        self.outcomes.push(outcome);
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Outcomes carrying exactly `decision`.
    #[must_use]
    pub fn count(&self, decision: Decision) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.decision == decision)
            .count()
    }

    /// Candidates that passed the filter and were acted on or failed trying.
    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| {
                outcome.phase == Phase::Dispatch
                    && matches!(outcome.decision, Decision::Dispatched | Decision::Failed(_))
            })
            .count()
    }

    /// Torrents dispatched plus torrents finalised.
    #[must_use]
    pub fn acted_count(&self) -> usize {
        self.count(Decision::Dispatched) + self.count(Decision::Done)
    }

    /// Dispatch and verification failures.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    /// Filtered, skipped and duplicate candidates.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome.decision,
                    Decision::Filtered(_) | Decision::Skipped(_) | Decision::Duplicate
                )
            })
            .count()
    }

    fn failures(&self) -> impl Iterator<Item = &TorrentOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.decision, Decision::Failed(_)))
    }

    /// Summary handed to the notifier.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            matched_count: self.matched_count(),
            acted_count: self.acted_count(),
            failed_count: self.failed_count(),
            failures: self
                .failures()
                .map(|outcome| FailureNote {
                    torrent_id: outcome.torrent_id.to_string(),
                    reason: failure_reason(outcome),
                })
                .collect(),
        }
    }
}

fn failure_reason(outcome: &TorrentOutcome) -> String {
    let kind = match outcome.decision {
        Decision::Failed(kind) => kind.as_str(),
        other => other.label(),
    };
    match &outcome.detail {
        Some(detail) => format!("{kind}: {detail}"),
        None => kind.to_string(),
    }
}
