//! Scheduler binding for the reconciliation engine.
//!
//! Three job kinds share one cancellation token: a cron job, a delayed
//! one-shot run and the recheck poll. Every job goes through the engine's run
//! lock, so a tick that lands while another run is active is skipped rather
//! than queued. Shutdown cancels the token and waits for every job; an
//! in-flight run stops at its next candidate boundary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use torset_config::CronSchedule;
use torset_engine::{EngineError, ReconciliationEngine};
use torset_telemetry::with_run_context;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Owns the background jobs driving one engine.
pub struct Scheduler {
    engine: Arc<ReconciliationEngine>,
    cancel: CancellationToken,
    jobs: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Scheduler for `engine`; `cancel` stops every job and in-flight run.
    #[must_use]
    pub const fn new(engine: Arc<ReconciliationEngine>, cancel: CancellationToken) -> Self {
        Self {
            engine,
            cancel,
            jobs: Vec::new(),
        }
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Run the engine at every fire time of `schedule`.
    pub fn register_cron(&mut self, schedule: CronSchedule) {
        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();
        info!(cron = schedule.expression(), "cron job registered");
        self.jobs.push(tokio::spawn(async move {
            loop {
                let Some(delay) = next_delay(&schedule, Utc::now()) else {
                    warn!(cron = schedule.expression(), "cron schedule has no upcoming fire time");
                    break;
                };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = sleep(delay) => {}
                }
                trigger_run(&engine, &cancel, "cron").await;
            }
        }));
    }

    /// Run the engine once after `delay`.
    pub fn register_once(&mut self, delay: Duration) {
        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();
        info!(delay_ms = millis(delay), "one-shot run registered");
        self.jobs.push(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(delay) => {}
            }
            trigger_run(&engine, &cancel, "one_shot").await;
        }));
    }

    /// Poll pending verifications every `every` while any are pending.
    pub fn register_poll(&mut self, every: Duration) {
        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();
        info!(interval_ms = millis(every), "recheck poll registered");
        self.jobs.push(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if engine.pending_count() == 0 {
                    continue;
                }
                match engine.poll_pending(&cancel).await {
                    Ok(record) => debug!(
                        finalised = record.outcomes.len(),
                        still_verifying = record.still_verifying,
                        "recheck poll tick finished"
                    ),
                    Err(EngineError::RunInProgress) => {
                        debug!("run in progress; recheck poll tick skipped");
                    }
                    Err(err) => warn!(error = %err, "recheck poll failed"),
                }
            }
        }));
    }

    /// Stop issuing runs, signal the in-flight run and wait for every job.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for job in self.jobs {
            if let Err(err) = job.await {
                warn!(error = %err, "scheduler job join failed");
            }
        }
        info!("scheduler stopped");
    }
}

/// Time from `now` until the next fire time of `schedule`.
#[must_use]
pub fn next_delay(schedule: &CronSchedule, now: DateTime<Utc>) -> Option<Duration> {
    let next = schedule.schedule().after(&now).next()?;
    Some((next - now).to_std().unwrap_or(Duration::ZERO))
}

async fn trigger_run(engine: &ReconciliationEngine, cancel: &CancellationToken, trigger: &str) {
    let run_id = Uuid::new_v4();
    let span = info_span!("reconcile", %run_id, trigger);
    match with_run_context(run_id, engine.run(cancel))
        .instrument(span)
        .await
    {
        Ok(record) => debug!(
            %run_id,
            outcomes = record.outcomes.len(),
            aborted = record.aborted,
            cancelled = record.cancelled,
            "scheduled run finished"
        ),
        Err(EngineError::RunInProgress) => {
            debug!(trigger, "previous run still active; tick skipped");
        }
        Err(err) => warn!(%run_id, trigger, error = %err, "scheduled run failed"),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
