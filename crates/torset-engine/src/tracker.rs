//! Bookkeeping for torrents awaiting verification at the destination.
//!
//! # Design
//! - One entry per destination id; `track` refuses duplicates.
//! - `poll` is the only other mutator. Released entries are removed before
//!   their outcome is returned, so an entry is reported terminal exactly once.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use torset_core::{
    AdapterError, AdapterResult, DownloaderAdapter, LabelSet, TorrentId, TorrentSnapshot, TorrentState,
};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// A dispatched torrent awaiting a completed recheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckEntry {
    /// Identifier at the destination.
    pub torrent_id: TorrentId,
    /// Identifier of the original torrent at the source.
    pub source_id: TorrentId,
    /// Labels the source record carried when it was dispatched.
    #[serde(default)]
    pub source_labels: LabelSet,
    /// When the torrent was added.
    pub added_at: DateTime<Utc>,
    /// Directory the payload must be verified under.
    pub expected_path: String,
    /// Polls that found the torrent still verifying.
    pub attempts: u32,
}

impl RecheckEntry {
    /// Fresh entry with no attempts recorded.
    #[must_use]
    pub fn new(torrent_id: TorrentId, source_id: TorrentId, expected_path: String) -> Self {
        Self {
            torrent_id,
            source_id,
            source_labels: LabelSet::new(),
            added_at: Utc::now(),
            expected_path,
            attempts: 0,
        }
    }

    /// Remember the source labels so the record can be re-labelled once verified.
    #[must_use]
    pub fn with_source_labels(mut self, labels: LabelSet) -> Self {
        self.source_labels = labels;
        self
    }
}

/// Why a tracked entry was released without being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    /// The destination reports an error state.
    Errored,
    /// The destination no longer knows the torrent.
    Missing,
    /// Completed, but under a different directory.
    PathMismatch,
    /// The attempt ceiling was exceeded.
    VerificationTimeout,
}

impl VerificationFailure {
    /// Render the failure as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Errored => "errored",
            Self::Missing => "missing",
            Self::PathMismatch => "path_mismatch",
            Self::VerificationTimeout => "verification_timeout",
        }
    }
}

/// Classification of one entry by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not yet verified; the entry stays tracked.
    StillVerifying {
        /// Identifier at the destination.
        torrent_id: TorrentId,
        /// Attempts recorded so far.
        attempts: u32,
    },
    /// Completed at the expected path; the entry was released.
    Verified(RecheckEntry),
    /// Released without verification.
    Failed {
        /// The released entry.
        entry: RecheckEntry,
        /// Why verification failed.
        reason: VerificationFailure,
    },
}

impl PollOutcome {
    /// Destination identifier the outcome refers to.
    #[must_use]
    pub const fn torrent_id(&self) -> &TorrentId {
        match self {
            Self::StillVerifying { torrent_id, .. } => torrent_id,
            Self::Verified(entry) | Self::Failed { entry, .. } => &entry.torrent_id,
        }
    }

    /// Metric label for the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::StillVerifying { .. } => "still_verifying",
            Self::Verified(_) => "verified",
            Self::Failed { reason, .. } => reason.as_str(),
        }
    }
}

/// Set of torrents awaiting verification.
#[derive(Debug, Default)]
pub struct RecheckTracker {
    entries: BTreeMap<TorrentId, RecheckEntry>,
}

impl RecheckTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTracked`] when the id is already pending.
    pub fn track(&mut self, entry: RecheckEntry) -> EngineResult<()> {
        if self.entries.contains_key(&entry.torrent_id) {
            return Err(EngineError::AlreadyTracked {
                torrent_id: entry.torrent_id,
            });
        }
        self.entries.insert(entry.torrent_id.clone(), entry);
        Ok(())
    }

    /// Whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: &TorrentId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<TorrentId> {
        self.entries.keys().cloned().collect()
    }

    /// Poll every pending entry.
    pub async fn poll(
        &mut self,
        adapter: &dyn DownloaderAdapter,
        max_attempts: u32,
    ) -> Vec<PollOutcome> {
        let ids = self.ids();
        self.poll_only(adapter, &ids, max_attempts).await
    }

    /// Poll the pending entries among `ids`; unknown ids are ignored.
    pub async fn poll_only(
        &mut self,
        adapter: &dyn DownloaderAdapter,
        ids: &[TorrentId],
        max_attempts: u32,
    ) -> Vec<PollOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.entries.contains_key(id) {
                continue;
            }
            let observed = adapter.get_state(id).await;
            if let Some(outcome) = self.classify(id, observed, max_attempts) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn classify(
        &mut self,
        id: &TorrentId,
        observed: AdapterResult<TorrentSnapshot>,
        max_attempts: u32,
    ) -> Option<PollOutcome> {
        let entry = self.entries.get(id)?;
        let released = match observed {
            Ok(snapshot) if snapshot.state == TorrentState::Completed => {
                if same_dir(&snapshot.save_path, &entry.expected_path) {
                    None
                } else {
                    warn!(
                        torrent_id = %id,
                        expected = %entry.expected_path,
                        actual = %snapshot.save_path,
                        "verified torrent sits under an unexpected directory"
                    );
                    Some(VerificationFailure::PathMismatch)
                }
            }
            Ok(snapshot) if snapshot.state == TorrentState::Error => {
                Some(VerificationFailure::Errored)
            }
            Err(AdapterError::NotFound { .. }) => Some(VerificationFailure::Missing),
            Ok(_) => return self.bump(id, max_attempts),
            Err(err) => {
                warn!(torrent_id = %id, error = %err, "recheck poll failed");
                return self.bump(id, max_attempts);
            }
        };
        let entry = self.entries.remove(id)?;
        Some(match released {
            None => PollOutcome::Verified(entry),
            Some(reason) => PollOutcome::Failed { entry, reason },
        })
    }

    fn bump(&mut self, id: &TorrentId, max_attempts: u32) -> Option<PollOutcome> {
        let entry = self.entries.get_mut(id)?;
        entry.attempts = entry.attempts.saturating_add(1);
        if entry.attempts > max_attempts {
            let entry = self.entries.remove(id)?;
            return Some(PollOutcome::Failed {
                entry,
                reason: VerificationFailure::VerificationTimeout,
            });
        }
        debug!(torrent_id = %id, attempts = entry.attempts, "torrent still verifying");
        Some(PollOutcome::StillVerifying {
            torrent_id: id.clone(),
            attempts: entry.attempts,
        })
    }
}

fn same_dir(actual: &str, expected: &str) -> bool {
    trim_separators(actual) == trim_separators(expected)
}

fn trim_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() { path } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torset_test_support::fixtures::completed_torrent;
    use torset_test_support::{FailureMode, Operation, ScriptedDownloader};

    fn entry(id: &str, path: &str) -> RecheckEntry {
        RecheckEntry::new(TorrentId::new(id), TorrentId::new(id), path.into())
    }

    #[test]
    fn duplicate_tracking_is_rejected() {
        let mut tracker = RecheckTracker::new();
        assert!(tracker.track(entry("abc", "/seed")).is_ok());
        let err = tracker
            .track(entry("ABC", "/elsewhere"))
            .expect_err("same id twice");
        assert!(matches!(err, EngineError::AlreadyTracked { .. }));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn verified_entries_are_released_once() {
        let destination =
            ScriptedDownloader::with_torrents("dest", vec![completed_torrent("abc", &[], "/seed/")]);
        let mut tracker = RecheckTracker::new();
        tracker.track(entry("abc", "/seed")).expect("fresh id");

        let outcomes = tracker.poll(&destination, 3).await;
        assert!(matches!(outcomes.as_slice(), [PollOutcome::Verified(_)]));
        assert!(tracker.is_empty());
        assert!(tracker.poll(&destination, 3).await.is_empty());
    }

    #[tokio::test]
    async fn errors_missing_and_wrong_paths_fail() {
        let destination = ScriptedDownloader::with_torrents(
            "dest",
            vec![
                completed_torrent("err", &[], "/seed"),
                completed_torrent("moved", &[], "/other"),
            ],
        );
        destination.set_state("err", TorrentState::Error);
        let mut tracker = RecheckTracker::new();
        for id in ["err", "gone", "moved"] {
            tracker.track(entry(id, "/seed")).expect("fresh id");
        }

        let reasons: Vec<_> = tracker
            .poll(&destination, 3)
            .await
            .into_iter()
            .map(|outcome| outcome.label())
            .collect();
        assert_eq!(reasons, vec!["errored", "missing", "path_mismatch"]);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn attempts_past_the_ceiling_time_out() {
        let destination =
            ScriptedDownloader::with_torrents("dest", vec![completed_torrent("abc", &[], "/seed")]);
        destination.set_state("abc", TorrentState::Other);
        destination.fail_next(Operation::GetState, FailureMode::Timeout);
        let mut tracker = RecheckTracker::new();
        tracker.track(entry("abc", "/seed")).expect("fresh id");

        for expected in 1..=2 {
            let outcomes = tracker.poll(&destination, 2).await;
            assert_eq!(
                outcomes,
                vec![PollOutcome::StillVerifying {
                    torrent_id: TorrentId::new("abc"),
                    attempts: expected,
                }]
            );
        }
        let outcomes = tracker.poll(&destination, 2).await;
        assert!(matches!(
            outcomes.as_slice(),
            [PollOutcome::Failed {
                reason: VerificationFailure::VerificationTimeout,
                ..
            }]
        ));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn poll_only_leaves_other_entries_untouched() {
        let destination = ScriptedDownloader::with_torrents(
            "dest",
            vec![
                completed_torrent("old", &[], "/seed"),
                completed_torrent("new", &[], "/seed"),
            ],
        );
        let mut tracker = RecheckTracker::new();
        tracker.track(entry("old", "/seed")).expect("fresh id");
        let earlier = tracker.ids();
        tracker.track(entry("new", "/seed")).expect("fresh id");

        let outcomes = tracker.poll_only(&destination, &earlier, 5).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].torrent_id().as_str(), "old");
        assert!(tracker.contains(&TorrentId::new("new")));
    }

    #[test]
    fn trailing_separators_are_ignored() {
        assert!(same_dir("/seed/tv/", "/seed/tv"));
        assert!(same_dir("/", "/"));
        assert!(!same_dir("/seed/tv", "/seed/films"));
    }
}
