//! Process wiring: configuration, logging, engine assembly and job lifecycle.
//!
//! # Design
//! - The downloader kind is resolved once here; nothing downstream branches on it.
//! - Shutdown stops the scheduler first, then drains the notifier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use torset_config::{
    DownloaderEndpoint, DownloaderKind, LogFormat as ConfigLogFormat, ONE_SHOT_DELAY,
    TorsetConfig, load_config_from_env,
};
use torset_core::{DownloaderAdapter, RetryPolicy};
use torset_engine::{EngineOptions, FsMetainfoStore, ReconciliationEngine};
use torset_events::EventBus;
use torset_qbittorrent::{QbittorrentAdapter, QbittorrentConfig};
use torset_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, record_app_mode};
use torset_transmission::{TransmissionAdapter, TransmissionConfig};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::notifier::spawn_notifier;
use crate::scheduler::Scheduler;

/// Base delay of the adapter-level retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Entry point for the boot sequence: load config, install logging, then run
/// until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, logging cannot be
/// installed, or the engine cannot be assembled.
pub async fn run_app() -> AppResult<()> {
    let config = load_config_from_env()
        .await
        .map_err(|err| AppError::config("config.load", err))?;
    let format = config
        .logging
        .log_format
        .map_or_else(LogFormat::infer, |format| match format {
            ConfigLogFormat::Json => LogFormat::Json,
            ConfigLogFormat::Pretty => LogFormat::Pretty,
        });
    torset_telemetry::init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: option_env!("TORSET_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("starting");

    run_app_with(config, shutdown_signal()).await
}

/// Boot sequence over an already loaded configuration. Returns once
/// `shutdown` resolves and every job has stopped.
///
/// # Errors
///
/// Returns an error if the engine cannot be assembled.
pub async fn run_app_with(
    config: TorsetConfig,
    shutdown: impl Future<Output = ()>,
) -> AppResult<()> {
    let plugin = &config.settings.plugin;
    if !plugin.enabled && !plugin.onlyonce {
        info!("reconciliation disabled; nothing to schedule");
        return Ok(());
    }
    record_app_mode(if plugin.enabled { "scheduled" } else { "once" });

    let events = EventBus::new();
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let engine = Arc::new(build_engine(&config, &events)?.with_metrics(metrics));

    let notifier_stop = CancellationToken::new();
    let notifier = plugin
        .notify
        .then(|| spawn_notifier(&events, notifier_stop.clone()));

    let mut scheduler = Scheduler::new(Arc::clone(&engine), CancellationToken::new());
    if plugin.enabled
        && let Some(cron) = &plugin.cron
    {
        scheduler.register_cron(cron.clone());
    }
    if plugin.onlyonce {
        scheduler.register_once(ONE_SHOT_DELAY);
    }
    scheduler.register_poll(plugin.recheck_interval);
    info!(
        source = plugin.source_downloader.as_deref().unwrap_or_default(),
        destination = plugin.destination_downloader.as_deref().unwrap_or_default(),
        "reconciliation scheduler started"
    );

    shutdown.await;
    info!("shutdown requested");
    scheduler.shutdown().await;
    notifier_stop.cancel();
    if let Some(notifier) = notifier
        && let Err(err) = notifier.await
    {
        warn!(error = %err, "notifier task join failed");
    }
    info!(
        pending = engine.pending_count(),
        "shutdown complete"
    );
    Ok(())
}

/// Assemble the engine described by `config`. Adapters are chosen once here
/// from each endpoint's kind.
///
/// # Errors
///
/// Returns an error if a downloader is undeclared, an adapter cannot be
/// built, or the torrent directory is unset.
pub fn build_engine(config: &TorsetConfig, events: &EventBus) -> AppResult<ReconciliationEngine> {
    let plugin = &config.settings.plugin;
    let source = config
        .source_endpoint()
        .map_err(|err| AppError::config("config.source_endpoint", err))?;
    let destination = config
        .destination_endpoint()
        .map_err(|err| AppError::config("config.destination_endpoint", err))?;
    let torrent_dir = plugin
        .torrent_dir
        .clone()
        .ok_or(AppError::MissingSetting {
            field: "fromtorrentpath",
        })?;

    Ok(ReconciliationEngine::new(
        build_adapter(source)?,
        build_adapter(destination)?,
        Arc::new(FsMetainfoStore::new(torrent_dir)),
        config.settings.policy.clone(),
        EngineOptions::from(plugin),
        events.clone(),
    ))
}

/// Construct the adapter for one downloader endpoint.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn build_adapter(endpoint: &DownloaderEndpoint) -> AppResult<Arc<dyn DownloaderAdapter>> {
    let retry = RetryPolicy::new(endpoint.retries, RETRY_BASE_DELAY);
    let adapter: Arc<dyn DownloaderAdapter> = match endpoint.kind {
        DownloaderKind::Qbittorrent => Arc::new(
            QbittorrentAdapter::new(QbittorrentConfig {
                base_url: endpoint.url.clone(),
                username: endpoint.username.clone(),
                password: endpoint.password.clone(),
                timeout: endpoint.timeout,
                retry,
            })
            .map_err(|source| AppError::Adapter {
                downloader: endpoint.name.clone(),
                source,
            })?,
        ),
        DownloaderKind::Transmission => Arc::new(
            TransmissionAdapter::new(TransmissionConfig {
                rpc_url: endpoint.url.clone(),
                username: endpoint.username.clone(),
                password: endpoint.password.clone(),
                timeout: endpoint.timeout,
                retry,
            })
            .map_err(|source| AppError::Adapter {
                downloader: endpoint.name.clone(),
                source,
            })?,
        ),
    };
    info!(
        downloader = %endpoint.name,
        kind = endpoint.kind.as_str(),
        url = %endpoint.url,
        "downloader adapter ready"
    );
    Ok(adapter)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
}
