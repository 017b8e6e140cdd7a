//! The reconciliation run loop.
//!
//! # Design
//! - One engine per deployment owns the source/destination adapters, the
//!   recheck tracker and the policy. The tracker sits behind the run lock, so
//!   runs and tracker polls never interleave.
//! - Cancellation is checked between candidates; a candidate that has begun
//!   dispatching finishes its calls before the run stops.
//! - Every adapter call carries a deadline (see [`TimedAdapter`]).

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use torset_config::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RECHECK_ATTEMPTS, PluginSettings, Policy};
use torset_core::{
    AddTorrent, AdapterError, DownloaderAdapter, RemoveTorrent, TorrentId, TorrentSnapshot,
};
use torset_events::{Event, EventBus};
use torset_telemetry::{Metrics, current_run_id};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::deadline::TimedAdapter;
use crate::error::{EngineError, EngineResult};
use crate::filter::matches;
use crate::metainfo::MetainfoStore;
use crate::record::{Decision, FailureKind, Phase, RunRecord, SkipReason, TorrentOutcome};
use crate::tracker::{PollOutcome, RecheckEntry, RecheckTracker};

/// Tunables that are not part of the transfer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Polls an entry may stay unverified before it fails.
    pub max_recheck_attempts: u32,
    /// Deadline applied to each downloader call.
    pub call_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_recheck_attempts: DEFAULT_MAX_RECHECK_ATTEMPTS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl From<&PluginSettings> for EngineOptions {
    fn from(settings: &PluginSettings) -> Self {
        Self {
            max_recheck_attempts: settings.max_recheck_attempts,
            call_timeout: settings.call_timeout,
        }
    }
}

struct Dispatch {
    outcome: TorrentOutcome,
    halt: bool,
}

impl Dispatch {
    const fn settled(outcome: TorrentOutcome) -> Self {
        Self {
            outcome,
            halt: false,
        }
    }

    fn adapter_failure(id: &TorrentId, err: &AdapterError) -> Self {
        warn!(torrent_id = %id, error = %err, "dispatch failed");
        Self {
            outcome: TorrentOutcome::new(
                id.clone(),
                Phase::Dispatch,
                Decision::Failed(FailureKind::Adapter(err.kind())),
            )
            .with_detail(err.to_string()),
            halt: err.is_unavailable(),
        }
    }

    fn already_tracked(id: &TorrentId, added: TorrentId) -> Self {
        let err = EngineError::AlreadyTracked { torrent_id: added };
        warn!(torrent_id = %id, error = %err, "destination torrent already awaiting verification");
        Self::settled(
            TorrentOutcome::new(
                id.clone(),
                Phase::Dispatch,
                Decision::Skipped(SkipReason::AlreadyTracked),
            )
            .with_detail(err.to_string()),
        )
    }
}

/// Moves completed torrents from a source downloader to a destination one.
pub struct ReconciliationEngine {
    source: TimedAdapter,
    destination: TimedAdapter,
    metainfo: Arc<dyn MetainfoStore>,
    policy: Policy,
    options: EngineOptions,
    events: EventBus,
    metrics: Option<Metrics>,
    tracker: Mutex<RecheckTracker>,
    pending: AtomicUsize,
}

impl ReconciliationEngine {
    /// Assemble an engine. Adapters are wrapped with the configured deadline.
    #[must_use]
    pub fn new(
        source: Arc<dyn DownloaderAdapter>,
        destination: Arc<dyn DownloaderAdapter>,
        metainfo: Arc<dyn MetainfoStore>,
        policy: Policy,
        options: EngineOptions,
        events: EventBus,
    ) -> Self {
        Self {
            source: TimedAdapter::new(source, options.call_timeout),
            destination: TimedAdapter::new(destination, options.call_timeout),
            metainfo,
            policy,
            options,
            events,
            metrics: None,
            tracker: Mutex::new(RecheckTracker::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Record run and decision counters into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Transfer policy the engine evaluates candidates against.
    #[must_use]
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Entries awaiting verification as of the last run or poll.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, RecheckTracker>> {
        self.tracker.try_lock().map_err(|_| {
            if let Some(metrics) = &self.metrics {
                metrics.inc_run("busy");
            }
            EngineError::RunInProgress
        })
    }

    /// Run one reconciliation pass.
    ///
    /// Candidates are enumerated at the source, filtered, and dispatched to
    /// the destination in order. Entries that were already pending when the
    /// pass began are then polled and finalised.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] when another run or poll holds
    /// the lock, and [`EngineError::BackendUnavailable`] when the source
    /// cannot enumerate candidates.
    pub async fn run(&self, cancel: &CancellationToken) -> EngineResult<RunRecord> {
        let mut tracker = self.lock()?;
        let run_id = current_run_id().unwrap_or_else(Uuid::new_v4);
        let mut record = RunRecord::start(run_id);
        let _ = self.events.publish(Event::RunStarted { run_id });
        info!(
            %run_id,
            source = self.source.backend(),
            destination = self.destination.backend(),
            "reconciliation run started"
        );

        let candidates = match self.source.list_completed().await {
            Ok(candidates) => candidates,
            Err(source) => {
                error!(%run_id, error = %source, "candidate enumeration failed; run aborted");
                let _ = self.events.publish(Event::RunAborted {
                    run_id,
                    reason: source.to_string(),
                });
                if let Some(metrics) = &self.metrics {
                    metrics.inc_run("aborted");
                }
                return Err(EngineError::BackendUnavailable {
                    operation: "list_completed",
                    source,
                });
            }
        };
        record.candidate_count = candidates.len();
        let previously_pending = tracker.ids();

        let mut halted: Option<SkipReason> = None;
        for snapshot in candidates {
            if halted.is_none() && cancel.is_cancelled() {
                info!(%run_id, "cancellation observed; skipping remaining candidates");
                halted = Some(SkipReason::Cancelled);
            }
            if let Some(reason) = halted {
                record.push(TorrentOutcome::new(
                    snapshot.id,
                    Phase::Dispatch,
                    Decision::Skipped(reason),
                ));
                continue;
            }
            if tracker.contains(&snapshot.id) {
                debug!(torrent_id = %snapshot.id, "candidate already awaiting verification");
                record.push(TorrentOutcome::new(
                    snapshot.id,
                    Phase::Dispatch,
                    Decision::Skipped(SkipReason::Pending),
                ));
                continue;
            }
            let decision = matches(&snapshot, &self.policy);
            if !decision.eligible {
                debug!(
                    torrent_id = %snapshot.id,
                    reason = decision.reason.as_str(),
                    "candidate filtered"
                );
                record.push(TorrentOutcome::new(
                    snapshot.id,
                    Phase::Dispatch,
                    Decision::Filtered(decision.reason),
                ));
                continue;
            }

            let dispatch = self.dispatch(&mut tracker, &snapshot).await;
            record.push(dispatch.outcome);
            if dispatch.halt {
                error!(
                    %run_id,
                    destination = self.destination.backend(),
                    "destination unavailable; halting run"
                );
                halted = Some(SkipReason::BackendUnavailable);
                record.aborted = true;
            }
        }

        record.cancelled = cancel.is_cancelled();
        if halted.is_none() && !record.cancelled {
            let outcomes = tracker
                .poll_only(
                    &self.destination,
                    &previously_pending,
                    self.options.max_recheck_attempts,
                )
                .await;
            self.finalize(outcomes, &mut record).await;
        }

        let outcome = if record.aborted {
            "aborted"
        } else if record.cancelled {
            "cancelled"
        } else {
            "completed"
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_run(outcome);
        }
        self.conclude(&mut record, &tracker);
        let summary = record.summary();
        info!(
            %run_id,
            outcome,
            candidates = record.candidate_count,
            matched = summary.matched_count,
            acted = summary.acted_count,
            failed = summary.failed_count,
            pending = tracker.len(),
            "reconciliation run finished"
        );
        let _ = self.events.publish(Event::RunCompleted { summary });
        Ok(record)
    }

    /// Poll every pending entry without enumerating new candidates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] when a run holds the lock.
    pub async fn poll_pending(&self, cancel: &CancellationToken) -> EngineResult<RunRecord> {
        let mut tracker = self.lock()?;
        let run_id = current_run_id().unwrap_or_else(Uuid::new_v4);
        let mut record = RunRecord::start(run_id);
        if !tracker.is_empty() && !cancel.is_cancelled() {
            let outcomes = tracker
                .poll(&self.destination, self.options.max_recheck_attempts)
                .await;
            self.finalize(outcomes, &mut record).await;
        }
        record.cancelled = cancel.is_cancelled();
        self.conclude(&mut record, &tracker);
        if !record.outcomes.is_empty() {
            info!(
                %run_id,
                finalised = record.outcomes.len(),
                pending = tracker.len(),
                "recheck poll finished"
            );
            let _ = self.events.publish(Event::RunCompleted {
                summary: record.summary(),
            });
        }
        Ok(record)
    }

    fn conclude(&self, record: &mut RunRecord, tracker: &RecheckTracker) {
        record.finish();
        self.pending.store(tracker.len(), Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.set_recheck_pending(tracker.len());
            for outcome in &record.outcomes {
                metrics.inc_decision(outcome.decision.label());
            }
        }
    }

    async fn dispatch(&self, tracker: &mut RecheckTracker, snapshot: &TorrentSnapshot) -> Dispatch {
        let id = &snapshot.id;
        if self.policy.deduplicate {
            match self.destination.contains(id).await {
                Ok(true) => {
                    info!(torrent_id = %id, "already present at destination");
                    return Dispatch::settled(TorrentOutcome::new(
                        id.clone(),
                        Phase::Dispatch,
                        Decision::Duplicate,
                    ));
                }
                Ok(false) => {}
                Err(err) => return Dispatch::adapter_failure(id, &err),
            }
        }

        let metainfo = match self.metainfo.load(id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(torrent_id = %id, error = %err, "metainfo unavailable");
                let detail = match &err {
                    EngineError::Metainfo { path, source, .. } => {
                        format!("{}: {source}", path.display())
                    }
                    other => other.to_string(),
                };
                return Dispatch::settled(
                    TorrentOutcome::new(
                        id.clone(),
                        Phase::Dispatch,
                        Decision::Failed(FailureKind::MetainfoMissing),
                    )
                    .with_detail(detail),
                );
            }
        };

        let download_dir = relocate(&snapshot.save_path, &self.policy);
        let request = AddTorrent {
            metainfo,
            download_dir: download_dir.clone(),
            start_paused: true,
            tags: self.policy.extra_tags.clone(),
        };
        let added = match self.destination.add_torrent(request).await {
            Ok(added) => added,
            Err(err) => {
                let dispatch = Dispatch::adapter_failure(id, &err);
                let _ = self.events.publish(Event::TorrentFailed {
                    torrent_id: id.to_string(),
                    reason: err.to_string(),
                });
                return dispatch;
            }
        };

        if tracker.contains(&added) {
            return Dispatch::already_tracked(id, added);
        }

        let mut notes = Vec::new();
        let mut halt = false;
        let limits = self.policy.rate_limit_for(&snapshot.labels);
        if !limits.is_unlimited()
            && let Err(err) = self.destination.set_rate_limits(&added, limits).await
        {
            warn!(torrent_id = %added, error = %err, "rate limits not applied");
            halt |= err.is_unavailable();
            notes.push(format!("rate limits: {err}"));
        }
        if let Err(err) = self.destination.recheck(&added).await {
            warn!(torrent_id = %added, error = %err, "recheck not triggered");
            halt |= err.is_unavailable();
            notes.push(format!("recheck: {err}"));
        }
        let entry = RecheckEntry::new(added.clone(), id.clone(), download_dir.clone())
            .with_source_labels(snapshot.labels.clone());
        if tracker.track(entry).is_err() {
            return Dispatch::already_tracked(id, added);
        }

        info!(
            torrent_id = %id,
            destination_id = %added,
            download_dir = %download_dir,
            "torrent dispatched"
        );
        let _ = self.events.publish(Event::TorrentDispatched {
            torrent_id: id.to_string(),
            download_dir,
        });
        let mut outcome = TorrentOutcome::new(id.clone(), Phase::Dispatch, Decision::Dispatched);
        if !notes.is_empty() {
            outcome = outcome.with_detail(notes.join("; "));
        }
        Dispatch { outcome, halt }
    }

    async fn finalize(&self, outcomes: Vec<PollOutcome>, record: &mut RunRecord) {
        for outcome in outcomes {
            if let Some(metrics) = &self.metrics {
                metrics.inc_recheck_outcome(outcome.label());
            }
            match outcome {
                PollOutcome::StillVerifying { .. } => record.still_verifying += 1,
                PollOutcome::Verified(entry) => record.push(self.complete(entry).await),
                PollOutcome::Failed { entry, reason } => {
                    warn!(
                        torrent_id = %entry.torrent_id,
                        reason = reason.as_str(),
                        attempts = entry.attempts,
                        "verification failed; source left untouched"
                    );
                    let _ = self.events.publish(Event::TorrentFailed {
                        torrent_id: entry.source_id.to_string(),
                        reason: reason.as_str().to_string(),
                    });
                    record.push(TorrentOutcome::new(
                        entry.source_id,
                        Phase::Verification,
                        Decision::Failed(FailureKind::Verification(reason)),
                    ));
                }
            }
        }
    }

    async fn complete(&self, entry: RecheckEntry) -> TorrentOutcome {
        let mut notes = Vec::new();
        if self.policy.auto_start
            && let Err(err) = self.destination.resume(&entry.torrent_id).await
        {
            warn!(torrent_id = %entry.torrent_id, error = %err, "verified torrent not resumed");
            notes.push(format!("resume: {err}"));
        }
        if self.policy.delete_source_metadata
            && let Err(err) = self
                .source
                .remove_torrent(&entry.source_id, RemoveTorrent { with_data: false })
                .await
        {
            warn!(torrent_id = %entry.source_id, error = %err, "source record not removed");
            let _ = self.events.publish(Event::TorrentFailed {
                torrent_id: entry.source_id.to_string(),
                reason: err.to_string(),
            });
            return TorrentOutcome::new(
                entry.source_id,
                Phase::Verification,
                Decision::Failed(FailureKind::Adapter(err.kind())),
            )
            .with_detail(err.to_string());
        }
        if !self.policy.delete_source_metadata
            && let Some(marker) = self.policy.transferred_label.as_deref()
        {
            let mut labels = entry.source_labels.clone();
            labels.insert(marker);
            if let Err(err) = self.source.set_labels(&entry.source_id, &labels).await {
                warn!(
                    torrent_id = %entry.source_id,
                    marker,
                    error = %err,
                    "source record not marked as transferred"
                );
                notes.push(format!("mark transferred: {err}"));
            }
        }

        info!(
            torrent_id = %entry.source_id,
            destination_id = %entry.torrent_id,
            "torrent verified"
        );
        let _ = self.events.publish(Event::TorrentVerified {
            torrent_id: entry.source_id.to_string(),
        });
        let outcome = TorrentOutcome::new(entry.source_id, Phase::Verification, Decision::Done);
        if notes.is_empty() {
            outcome
        } else {
            outcome.with_detail(notes.join("; "))
        }
    }
}

/// Directory a candidate saved under `save_path` is added under at the destination.
///
/// With both `source_path` and `dest_path` set, a matching `source_path`
/// prefix (compared by path component) is replaced by `dest_path`. With only
/// `dest_path` set, `dest_path` is used as is. Otherwise `save_path` is kept.
#[must_use]
pub fn relocate(save_path: &str, policy: &Policy) -> String {
    let Some(dest) = policy.dest_path.as_deref().filter(|dest| !dest.is_empty()) else {
        return save_path.to_string();
    };
    let Some(source) = policy.source_path.as_deref().filter(|source| !source.is_empty()) else {
        return dest.to_string();
    };
    match Path::new(save_path).strip_prefix(source) {
        Ok(rest) if rest.as_os_str().is_empty() => dest.to_string(),
        Ok(rest) => {
            let mut relocated = PathBuf::from(dest);
            relocated.extend(
                rest.components()
                    .filter(|part| matches!(part, Component::Normal(_))),
            );
            relocated.to_string_lossy().into_owned()
        }
        Err(_) => save_path.to_string(),
    }
}
