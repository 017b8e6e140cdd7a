//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges relevant to reconciliation passes.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{MetricStage, Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the workspace.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    reconcile_runs_total: IntCounterVec,
    torrent_decisions_total: IntCounterVec,
    recheck_outcomes_total: IntCounterVec,
    recheck_pending: IntGauge,
}

/// Snapshot of selected gauges for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Entries currently awaiting verification.
    pub recheck_pending: i64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::metric(name, MetricStage::Build, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::metric(name, MetricStage::Register, source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_runs_total = counter_vec(
            "reconcile_runs_total",
            "Reconciliation passes by outcome",
            &["outcome"],
        )?;
        let torrent_decisions_total = counter_vec(
            "torrent_decisions_total",
            "Per-torrent decisions recorded by reconciliation passes",
            &["decision"],
        )?;
        let recheck_outcomes_total = counter_vec(
            "recheck_outcomes_total",
            "Verification poll outcomes",
            &["outcome"],
        )?;
        let recheck_pending = IntGauge::with_opts(Opts::new(
            "recheck_pending",
            "Torrents awaiting verification",
        ))
        .map_err(|source| TelemetryError::metric("recheck_pending", MetricStage::Build, source))?;

        register(&registry, "reconcile_runs_total", &reconcile_runs_total)?;
        register(&registry, "torrent_decisions_total", &torrent_decisions_total)?;
        register(&registry, "recheck_outcomes_total", &recheck_outcomes_total)?;
        register(&registry, "recheck_pending", &recheck_pending)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                reconcile_runs_total,
                torrent_decisions_total,
                recheck_outcomes_total,
                recheck_pending,
            }),
        })
    }

    /// Count a finished pass (`completed`, `cancelled`, `aborted`, `busy`).
    pub fn inc_run(&self, outcome: &str) {
        self.inner
            .reconcile_runs_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count one per-torrent decision.
    pub fn inc_decision(&self, decision: &str) {
        self.inner
            .torrent_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    /// Count one verification poll outcome.
    pub fn inc_recheck_outcome(&self, outcome: &str) {
        self.inner
            .recheck_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Set the pending-verification gauge.
    pub fn set_recheck_pending(&self, count: usize) {
        self.inner
            .recheck_pending
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderUtf8 { source })
    }

    /// Take a point-in-time snapshot of the gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recheck_pending: self.inner.recheck_pending.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_with_labels() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_run("completed");
        metrics.inc_decision("dispatched");
        metrics.inc_decision("dispatched");
        metrics.inc_recheck_outcome("verified");
        metrics.set_recheck_pending(3);

        let rendered = metrics.render()?;
        assert!(rendered.contains("reconcile_runs_total{outcome=\"completed\"} 1"));
        assert!(rendered.contains("torrent_decisions_total{decision=\"dispatched\"} 2"));
        assert!(rendered.contains("recheck_outcomes_total{outcome=\"verified\"} 1"));
        assert!(rendered.contains("recheck_pending 3"));
        assert_eq!(metrics.snapshot().recheck_pending, 3);
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_run("aborted");
        assert!(!second.render()?.contains("aborted"));
        Ok(())
    }
}
