use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use torset_config::Policy;
use torset_core::{
    AddTorrent, AdapterErrorKind, AdapterResult, DownloaderAdapter, LabelSet, RateLimit,
    RemoveTorrent, TorrentId, TorrentSnapshot, TorrentState,
};
use torset_engine::{
    Decision, EngineError, EngineOptions, FailureKind, FilterReason, FsMetainfoStore,
    ReconciliationEngine, SkipReason, VerificationFailure,
};
use torset_events::{Event, EventBus};
use torset_telemetry::{Metrics, with_run_context};
use torset_test_support::fixtures::{completed_batch, completed_torrent, transfer_policy};
use torset_test_support::{Call, FailureMode, Operation, ScriptedDownloader};
use uuid::Uuid;

struct Harness {
    source: ScriptedDownloader,
    destination: ScriptedDownloader,
    engine: ReconciliationEngine,
    events: EventBus,
    torrent_dir: TempDir,
}

fn harness(torrents: Vec<TorrentSnapshot>, policy: Policy) -> Result<Harness> {
    let source = ScriptedDownloader::with_torrents("source", torrents.clone());
    harness_over(source, torrents, policy)
}

fn harness_over(
    source: ScriptedDownloader,
    torrents: Vec<TorrentSnapshot>,
    policy: Policy,
) -> Result<Harness> {
    let torrent_dir = tempfile::tempdir()?;
    for torrent in &torrents {
        std::fs::write(
            torrent_dir.path().join(format!("{}.torrent", torrent.id)),
            torrent.id.as_str(),
        )?;
    }
    let destination = ScriptedDownloader::new("destination");
    let events = EventBus::new();
    let engine = ReconciliationEngine::new(
        Arc::new(source.clone()),
        Arc::new(destination.clone()),
        Arc::new(FsMetainfoStore::new(torrent_dir.path())),
        policy,
        EngineOptions {
            max_recheck_attempts: 3,
            call_timeout: Duration::from_secs(5),
        },
        events.clone(),
    );
    Ok(Harness {
        source,
        destination,
        engine,
        events,
        torrent_dir,
    })
}

async fn drain(events: &EventBus) -> Vec<Event> {
    let mut stream = events.subscribe(Some(0));
    let mut seen = Vec::new();
    while let Ok(Some(envelope)) =
        tokio::time::timeout(Duration::from_millis(20), stream.next()).await
    {
        seen.push(envelope.event);
    }
    seen
}

fn touches(call: &Call, id: &TorrentId) -> bool {
    match call {
        Call::SetLabels(target)
        | Call::SetCategory(target)
        | Call::SetRateLimits(target, _)
        | Call::Remove(target, _)
        | Call::Recheck(target)
        | Call::Resume(target)
        | Call::GetState(target) => target == id,
        Call::ListCompleted | Call::Add { .. } => false,
    }
}

#[tokio::test]
async fn cancellation_after_three_candidates_skips_the_rest() -> Result<()> {
    let batch = completed_batch(10);
    let ids: Vec<TorrentId> = batch.iter().map(|torrent| torrent.id.clone()).collect();
    let h = harness(batch, transfer_policy())?;
    let cancel = CancellationToken::new();
    h.destination.cancel_on_add(3, cancel.clone());

    let record = h.engine.run(&cancel).await?;

    assert!(record.cancelled);
    assert_eq!(record.candidate_count, 10);
    assert_eq!(record.count(Decision::Dispatched), 3);
    assert_eq!(record.count(Decision::Skipped(SkipReason::Cancelled)), 7);
    assert_eq!(h.destination.add_calls(), 3);
    let mutations = h.destination.mutations();
    assert_eq!(mutations.len(), 6);
    for id in &ids[3..] {
        assert!(h.destination.torrent(id.as_str()).is_none());
        assert!(!mutations.iter().any(|call| touches(call, id)));
    }
    assert!(h.source.mutations().is_empty());
    Ok(())
}

#[tokio::test]
async fn dispatch_adds_paused_relocated_and_tagged() -> Result<()> {
    let mut policy = transfer_policy();
    policy.default_limits = RateLimit {
        upload_bps: Some(1_024),
        download_bps: None,
    };
    let h = harness(
        vec![completed_torrent("abc", &["tv"], "/downloads/tv")],
        policy,
    )?;

    let record = h.engine.run(&CancellationToken::new()).await?;

    assert_eq!(record.count(Decision::Dispatched), 1);
    assert_eq!(h.engine.pending_count(), 1);
    let id = TorrentId::new("abc");
    assert_eq!(
        h.destination.calls(),
        vec![
            Call::Add {
                download_dir: "/seed/tv".into(),
                start_paused: true,
                tags: vec!["moved".into()],
            },
            Call::SetRateLimits(
                id.clone(),
                RateLimit {
                    upload_bps: Some(1_024),
                    download_bps: None,
                }
            ),
            Call::Recheck(id),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn second_run_finalises_and_third_run_is_idle() -> Result<()> {
    let mut policy = transfer_policy();
    policy.delete_source_metadata = true;
    let h = harness(completed_batch(2), policy)?;
    let cancel = CancellationToken::new();

    let first = h.engine.run(&cancel).await?;
    assert_eq!(first.matched_count(), 2);

    let second = h.engine.run(&cancel).await?;
    assert_eq!(second.matched_count(), 0);
    assert_eq!(second.count(Decision::Skipped(SkipReason::Pending)), 2);
    assert_eq!(second.count(Decision::Done), 2);
    assert_eq!(h.engine.pending_count(), 0);
    let removals: Vec<Call> = h
        .source
        .mutations()
        .into_iter()
        .filter(|call| matches!(call, Call::Remove(..)))
        .collect();
    assert_eq!(removals.len(), 2);
    assert!(removals.iter().all(|call| matches!(
        call,
        Call::Remove(_, RemoveTorrent { with_data: false })
    )));
    assert_eq!(
        h.destination.torrent("hash-00").map(|torrent| torrent.state),
        Some(TorrentState::Completed)
    );

    let third = h.engine.run(&cancel).await?;
    assert_eq!(third.candidate_count, 0);
    assert_eq!(third.matched_count(), 0);
    assert!(third.outcomes.is_empty());
    assert_eq!(h.destination.add_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn kept_sources_are_marked_and_never_matched_again() -> Result<()> {
    let h = harness(completed_batch(2), transfer_policy())?;
    let cancel = CancellationToken::new();

    let first = h.engine.run(&cancel).await?;
    let second = h.engine.run(&cancel).await?;
    let third = h.engine.run(&cancel).await?;
    let fourth = h.engine.run(&cancel).await?;

    assert_eq!(first.matched_count(), 2);
    assert_eq!(second.count(Decision::Done), 2);
    assert_eq!(
        third.count(Decision::Filtered(FilterReason::AlreadyTransferred)),
        2
    );
    assert_eq!(third.matched_count(), 0);
    assert_eq!(fourth.matched_count(), 0);
    assert_eq!(third.failed_count() + fourth.failed_count(), 0);
    assert_eq!(h.destination.add_calls(), 2);

    let kept = h.source.torrent("hash-00").map(|torrent| torrent.labels);
    assert_eq!(kept, Some(LabelSet::from_list(["tv", "transferred"])));
    let source_mutations = h.source.mutations();
    assert_eq!(
        source_mutations
            .iter()
            .filter(|call| matches!(call, Call::SetLabels(_)))
            .count(),
        2
    );
    assert!(!source_mutations.iter().any(|call| matches!(call, Call::Remove(..))));
    Ok(())
}

#[tokio::test]
async fn verified_torrents_resume_only_with_autostart() -> Result<()> {
    for auto_start in [true, false] {
        let mut policy = transfer_policy();
        policy.auto_start = auto_start;
        let h = harness(completed_batch(1), policy)?;
        let cancel = CancellationToken::new();

        h.engine.run(&cancel).await?;
        let second = h.engine.run(&cancel).await?;

        assert_eq!(second.count(Decision::Done), 1);
        let resumed = h
            .destination
            .mutations()
            .contains(&Call::Resume(TorrentId::new("hash-00")));
        assert_eq!(resumed, auto_start, "auto_start = {auto_start}");
    }
    Ok(())
}

#[tokio::test]
async fn failed_source_removal_fails_the_torrent() -> Result<()> {
    let mut policy = transfer_policy();
    policy.delete_source_metadata = true;
    let h = harness(completed_batch(1), policy)?;
    let cancel = CancellationToken::new();
    h.engine.run(&cancel).await?;
    h.source
        .fail_next(Operation::Remove, FailureMode::Rejected("record locked".into()));

    let second = h.engine.run(&cancel).await?;

    assert_eq!(
        second.count(Decision::Failed(FailureKind::Adapter(
            AdapterErrorKind::AddRejected
        ))),
        1
    );
    assert_eq!(second.count(Decision::Done), 0);
    assert_eq!(h.engine.pending_count(), 0);
    assert!(h.source.torrent("hash-00").is_some());
    assert_eq!(
        h.source.mutations(),
        vec![Call::Remove(
            TorrentId::new("hash-00"),
            RemoveTorrent { with_data: false }
        )]
    );
    let events = drain(&h.events).await;
    assert!(events.iter().any(|event| matches!(
        event,
        Event::TorrentFailed { torrent_id, .. } if torrent_id == "hash-00"
    )));
    assert!(!events.iter().any(|event| matches!(
        event,
        Event::TorrentVerified { torrent_id } if torrent_id == "hash-00"
    )));
    Ok(())
}

#[tokio::test]
async fn unmarked_sources_are_kept_when_deletion_is_off() -> Result<()> {
    let mut policy = transfer_policy();
    policy.transferred_label = None;
    let h = harness(completed_batch(1), policy)?;
    let cancel = CancellationToken::new();

    h.engine.run(&cancel).await?;
    let second = h.engine.run(&cancel).await?;

    assert_eq!(second.count(Decision::Done), 1);
    assert_eq!(
        h.source.torrent("hash-00").map(|torrent| torrent.labels),
        Some(LabelSet::from_list(["tv"]))
    );
    assert!(h.source.mutations().is_empty());
    Ok(())
}

#[tokio::test]
async fn destination_id_already_awaiting_verification_is_skipped() -> Result<()> {
    let h = harness(
        vec![completed_torrent("abc", &["tv"], "/downloads/tv")],
        transfer_policy(),
    )?;
    h.destination.set_recheck_outcome(TorrentState::Other);
    let cancel = CancellationToken::new();
    h.engine.run(&cancel).await?;

    let tracked = TorrentId::new("abc");
    h.destination
        .remove_torrent(&tracked, RemoveTorrent { with_data: false })
        .await?;
    h.destination.clear_calls();
    std::fs::write(h.torrent_dir.path().join("def.torrent"), "abc")?;
    h.source
        .insert(completed_torrent("def", &["tv"], "/downloads/tv"));

    let second = h.engine.run(&cancel).await?;

    let def = second
        .outcomes
        .iter()
        .find(|outcome| outcome.torrent_id.as_str() == "def")
        .map(|outcome| outcome.decision);
    assert_eq!(def, Some(Decision::Skipped(SkipReason::AlreadyTracked)));
    assert_eq!(second.count(Decision::Dispatched), 0);
    assert_eq!(h.destination.add_calls(), 1);
    assert!(!h.destination.calls().iter().any(|call| matches!(
        call,
        Call::SetRateLimits(..) | Call::Recheck(_)
    )));
    assert_eq!(h.engine.pending_count(), 1);
    Ok(())
}

#[tokio::test]
async fn deduplication_adds_each_torrent_at_most_once() -> Result<()> {
    let mut policy = transfer_policy();
    policy.deduplicate = true;
    let h = harness(vec![completed_torrent("abc", &["tv"], "/downloads")], policy)?;
    let cancel = CancellationToken::new();

    h.engine.run(&cancel).await?;
    h.engine.run(&cancel).await?;
    let third = h.engine.run(&cancel).await?;
    let fourth = h.engine.run(&cancel).await?;

    assert_eq!(h.destination.add_calls(), 1);
    assert_eq!(third.count(Decision::Duplicate), 1);
    assert_eq!(third.matched_count(), 0);
    assert_eq!(fourth.count(Decision::Duplicate), 1);
    Ok(())
}

#[tokio::test]
async fn enumeration_outage_aborts_before_acting() -> Result<()> {
    let h = harness(completed_batch(3), transfer_policy())?;
    h.source
        .fail_next(Operation::ListCompleted, FailureMode::Unavailable);

    let err = h
        .engine
        .run(&CancellationToken::new())
        .await
        .expect_err("source is down");

    assert!(matches!(err, EngineError::BackendUnavailable { .. }));
    assert!(h.destination.calls().is_empty());
    let events = drain(&h.events).await;
    assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
    assert!(matches!(events.last(), Some(Event::RunAborted { .. })));
    Ok(())
}

#[tokio::test]
async fn rejected_add_fails_only_that_torrent() -> Result<()> {
    let h = harness(completed_batch(2), transfer_policy())?;
    h.destination
        .fail_next(Operation::Add, FailureMode::Rejected("disk full".into()));

    let record = h.engine.run(&CancellationToken::new()).await?;

    assert!(!record.aborted);
    assert_eq!(
        record.outcomes[0].decision,
        Decision::Failed(FailureKind::Adapter(AdapterErrorKind::AddRejected))
    );
    assert_eq!(record.outcomes[1].decision, Decision::Dispatched);
    assert_eq!(record.matched_count(), 2);
    assert_eq!(record.failed_count(), 1);
    let summary = record.summary();
    assert_eq!(summary.failures[0].torrent_id, "hash-00");
    assert!(summary.failures[0].reason.contains("disk full"));
    Ok(())
}

#[tokio::test]
async fn unreachable_destination_halts_the_run() -> Result<()> {
    let mut policy = transfer_policy();
    policy.delete_source_metadata = true;
    let h = harness(completed_batch(3), policy)?;
    h.destination
        .fail_always(Operation::Add, FailureMode::Unavailable);

    let record = h.engine.run(&CancellationToken::new()).await?;

    assert!(record.aborted);
    assert_eq!(
        record.count(Decision::Failed(FailureKind::Adapter(
            AdapterErrorKind::BackendUnavailable
        ))),
        1
    );
    assert_eq!(
        record.count(Decision::Skipped(SkipReason::BackendUnavailable)),
        2
    );
    assert_eq!(h.destination.add_calls(), 1);
    assert!(h.source.mutations().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_verification_leaves_the_source_untouched() -> Result<()> {
    let mut policy = transfer_policy();
    policy.delete_source_metadata = true;
    let h = harness(completed_batch(1), policy)?;
    h.destination.set_recheck_outcome(TorrentState::Error);
    let cancel = CancellationToken::new();

    h.engine.run(&cancel).await?;
    let poll = h.engine.poll_pending(&cancel).await?;

    assert_eq!(
        poll.count(Decision::Failed(FailureKind::Verification(
            VerificationFailure::Errored
        ))),
        1
    );
    assert!(h.source.mutations().is_empty());
    assert_eq!(h.engine.pending_count(), 0);
    let events = drain(&h.events).await;
    assert!(events.iter().any(|event| matches!(
        event,
        Event::TorrentFailed { torrent_id, reason } if torrent_id == "hash-00" && reason == "errored"
    )));
    Ok(())
}

#[tokio::test]
async fn slow_verification_times_out_after_the_ceiling() -> Result<()> {
    let h = harness(completed_batch(1), transfer_policy())?;
    h.destination.set_recheck_outcome(TorrentState::Other);
    let cancel = CancellationToken::new();
    h.engine.run(&cancel).await?;

    for _ in 0..3 {
        let poll = h.engine.poll_pending(&cancel).await?;
        assert_eq!(poll.still_verifying, 1);
        assert!(poll.outcomes.is_empty());
    }
    let poll = h.engine.poll_pending(&cancel).await?;
    assert_eq!(
        poll.count(Decision::Failed(FailureKind::Verification(
            VerificationFailure::VerificationTimeout
        ))),
        1
    );
    assert_eq!(h.engine.pending_count(), 0);
    assert!(h.engine.poll_pending(&cancel).await?.outcomes.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_metainfo_is_a_per_torrent_failure() -> Result<()> {
    let present = completed_torrent("abc", &["tv"], "/downloads");
    let absent = completed_torrent("def", &["tv"], "/downloads");
    let source =
        ScriptedDownloader::with_torrents("source", vec![present.clone(), absent]);
    let h = harness_over(source, vec![present], transfer_policy())?;

    let record = h.engine.run(&CancellationToken::new()).await?;

    assert_eq!(record.count(Decision::Dispatched), 1);
    assert_eq!(
        record.count(Decision::Failed(FailureKind::MetainfoMissing)),
        1
    );
    assert_eq!(h.destination.add_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn filter_reasons_are_recorded_without_side_effects() -> Result<()> {
    let mut policy = transfer_policy();
    policy.exclude_labels = LabelSet::from_list(["private"]);
    policy.include_labels = LabelSet::from_list(["tv"]);
    let h = harness(
        vec![
            completed_torrent("a", &["tv", "private"], "/downloads"),
            completed_torrent("b", &[], "/downloads"),
            completed_torrent("c", &["music"], "/downloads"),
        ],
        policy,
    )?;

    let record = h.engine.run(&CancellationToken::new()).await?;

    let decisions: Vec<Decision> = record.outcomes.iter().map(|o| o.decision).collect();
    assert_eq!(
        decisions,
        vec![
            Decision::Filtered(FilterReason::ExcludedLabel),
            Decision::Filtered(FilterReason::EmptyLabel),
            Decision::Filtered(FilterReason::NotIncludedLabel),
        ]
    );
    assert_eq!(record.skipped_count(), 3);
    assert!(h.destination.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn run_identity_and_metrics_follow_the_context() -> Result<()> {
    let metrics = Metrics::new()?;
    let h = harness(completed_batch(2), transfer_policy())?;
    let engine = h.engine.with_metrics(metrics.clone());
    let run_id = Uuid::new_v4();
    let cancel = CancellationToken::new();

    let record = with_run_context(run_id, engine.run(&cancel)).await?;

    assert_eq!(record.run_id, run_id);
    let rendered = metrics.render()?;
    assert!(rendered.contains("torrent_decisions_total{decision=\"dispatched\"} 2"));
    assert!(rendered.contains("reconcile_runs_total{outcome=\"completed\"} 1"));
    assert_eq!(metrics.snapshot().recheck_pending, 2);
    let events = drain(&h.events).await;
    let summary = events.iter().find_map(|event| match event {
        Event::RunCompleted { summary } => Some(summary.clone()),
        _ => None,
    });
    assert_eq!(summary.map(|summary| summary.acted_count), Some(2));
    Ok(())
}

struct Gated {
    inner: ScriptedDownloader,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl DownloaderAdapter for Gated {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.list_completed().await
    }

    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId> {
        self.inner.add_torrent(request).await
    }

    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()> {
        self.inner.set_labels(id, labels).await
    }

    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()> {
        self.inner.set_rate_limits(id, limits).await
    }

    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()> {
        self.inner.remove_torrent(id, options).await
    }

    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()> {
        self.inner.recheck(id).await
    }

    async fn resume(&self, id: &TorrentId) -> AdapterResult<()> {
        self.inner.resume(id).await
    }

    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
        self.inner.get_state(id).await
    }
}

#[tokio::test]
async fn overlapping_runs_are_refused() -> Result<()> {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = Gated {
        inner: ScriptedDownloader::with_torrents("source", completed_batch(1)),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::new(source),
        Arc::new(ScriptedDownloader::new("destination")),
        Arc::new(FsMetainfoStore::new("/nonexistent")),
        transfer_policy(),
        EngineOptions::default(),
        EventBus::new(),
    ));
    let cancel = CancellationToken::new();

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        async move { engine.run(&cancel).await }
    });
    entered.notified().await;

    assert!(matches!(
        engine.run(&cancel).await,
        Err(EngineError::RunInProgress)
    ));
    assert!(matches!(
        engine.poll_pending(&cancel).await,
        Err(EngineError::RunInProgress)
    ));

    release.notify_one();
    let record = first.await??;
    assert_eq!(record.candidate_count, 1);
    assert_eq!(
        record.count(Decision::Failed(FailureKind::MetainfoMissing)),
        1
    );
    Ok(())
}
