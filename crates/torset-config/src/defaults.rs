//! Default values applied when the settings form leaves a field blank.

use std::time::Duration;

/// Delay before the one-shot run requested by `onlyonce`.
pub const ONE_SHOT_DELAY: Duration = Duration::from_secs(3);
/// Cadence of the recheck poll job.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(180);
/// Tracker attempt ceiling before an entry is reported as timed out.
pub const DEFAULT_MAX_RECHECK_ATTEMPTS: u32 = 20;
/// Deadline applied to each downloader call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default adapter-level retries for transient failures.
pub(crate) const DEFAULT_RETRIES: u32 = 2;
/// Default per-request HTTP timeout in seconds.
pub(crate) const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
/// Default log level.
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
/// Tags added to transferred torrents when the form does not override them.
pub(crate) const DEFAULT_EXTRA_TAGS: &str = "已整理,转移做种";
/// Label left on a kept source record once its transfer is verified.
pub(crate) const DEFAULT_TRANSFERRED_LABEL: &str = "transferred";
