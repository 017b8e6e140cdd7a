//! Typed configuration models.
//!
//! # Design
//! - The settings form is a flat key-value object; [`Settings::from_form`]
//!   maps it onto a typed [`Policy`] (what to reconcile) and
//!   [`PluginSettings`] (when and between which downloaders).
//! - Downloader endpoints are declared separately and referenced by name.
//! - Everything is immutable once loaded; a new run picks up a new snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use torset_core::{LabelSet, RateLimit};
use url::Url;

use crate::defaults::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_EXTRA_TAGS, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_RECHECK_ATTEMPTS, DEFAULT_RECHECK_INTERVAL, DEFAULT_RETRIES,
    DEFAULT_TRANSFERRED_LABEL,
};
use crate::error::{ConfigError, ConfigResult};
use crate::validate::{
    kib_to_bps, lookup, parse_cron, parse_rate_rules, read_bool, read_list, read_string, read_u64,
};

/// Per-label rate caps; the first rule whose label the torrent carries wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRule {
    /// Label the rule applies to.
    pub label: String,
    /// Caps applied to matching torrents.
    pub limits: RateLimit,
}

/// User-declared filter and action policy, immutable for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Torrents carrying any of these labels are skipped.
    pub exclude_labels: LabelSet,
    /// When non-empty, torrents must carry at least one of these labels.
    pub include_labels: LabelSet,
    /// When set, torrent category must match exactly.
    pub include_category: Option<String>,
    /// Save-path prefixes that disqualify a torrent.
    pub exclude_paths: Vec<String>,
    /// Base directory on the source side, replaced during relocation.
    pub source_path: Option<String>,
    /// Base directory on the destination side.
    pub dest_path: Option<String>,
    /// Remove the source record (keeping data) after verification.
    pub delete_source_metadata: bool,
    /// Skip torrents already present at the destination.
    pub deduplicate: bool,
    /// Whether unlabelled completed torrents are eligible.
    pub allow_empty_label_transfer: bool,
    /// Tags appended to every newly added torrent, in order.
    pub extra_tags: Vec<String>,
    /// Label added to a kept source record after verification; carriers are
    /// never matched again. `None` disables marking.
    pub transferred_label: Option<String>,
    /// Resume the destination torrent once verified.
    pub auto_start: bool,
    /// Caps applied when no rate rule matches.
    pub default_limits: RateLimit,
    /// Per-label caps, checked in declaration order.
    pub rate_rules: Vec<RateRule>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            exclude_labels: LabelSet::new(),
            include_labels: LabelSet::new(),
            include_category: None,
            exclude_paths: Vec::new(),
            source_path: None,
            dest_path: None,
            delete_source_metadata: false,
            deduplicate: false,
            allow_empty_label_transfer: false,
            extra_tags: Vec::new(),
            transferred_label: Some(DEFAULT_TRANSFERRED_LABEL.to_string()),
            auto_start: true,
            default_limits: RateLimit::default(),
            rate_rules: Vec::new(),
        }
    }
}

impl Policy {
    /// Rate caps for a torrent carrying `labels`.
    #[must_use]
    pub fn rate_limit_for(&self, labels: &LabelSet) -> RateLimit {
        self.rate_rules
            .iter()
            .find(|rule| labels.contains(&rule.label))
            .map_or(self.default_limits, |rule| rule.limits)
    }

    fn from_form(form: &Map<String, Value>) -> ConfigResult<Self> {
        let extra_tags = if lookup(form, &["add_torrent_tags"]).is_some() {
            read_list(form, &["add_torrent_tags"], &[','])?
        } else {
            DEFAULT_EXTRA_TAGS
                .split(',')
                .map(str::to_string)
                .collect()
        };
        let transferred_label = if lookup(form, &["transferred_label"]).is_some() {
            read_string(form, &["transferred_label"])?
        } else {
            Some(DEFAULT_TRANSFERRED_LABEL.to_string())
        };
        let rate_rules = match read_string(form, &["rate_rules"])? {
            Some(raw) => parse_rate_rules(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            exclude_labels: LabelSet::from_list(read_list(form, &["nolabels"], &[','])?),
            include_labels: LabelSet::from_list(read_list(form, &["includelabels"], &[','])?),
            include_category: read_string(form, &["includecategory"])?,
            exclude_paths: read_list(form, &["nopaths"], &['\n'])?,
            source_path: read_string(form, &["frompath"])?,
            dest_path: read_string(form, &["topath"])?,
            delete_source_metadata: read_bool(form, &["deletesource"], false)?,
            deduplicate: read_bool(form, &["deleteduplicate"], false)?,
            allow_empty_label_transfer: read_bool(form, &["transferemptylabel"], false)?,
            extra_tags,
            transferred_label,
            auto_start: read_bool(form, &["autostart"], true)?,
            default_limits: RateLimit {
                upload_bps: kib_to_bps(read_u64(form, &["upload_limit"], 0)?),
                download_bps: kib_to_bps(read_u64(form, &["download_limit"], 0)?),
            },
            rate_rules,
        })
    }
}

/// Parsed crontab expression.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub(crate) fn new(expression: &str, schedule: cron::Schedule) -> Self {
        Self {
            expression: expression.to_string(),
            schedule,
        }
    }

    /// Expression as the user wrote it.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Parsed schedule used to compute upcoming ticks.
    #[must_use]
    pub const fn schedule(&self) -> &cron::Schedule {
        &self.schedule
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("CronSchedule")
            .field(&self.expression)
            .finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

/// Scheduling and wiring options from the settings form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSettings {
    /// Register the cron job.
    pub enabled: bool,
    /// Forward run summaries to the notifier.
    pub notify: bool,
    /// Run once shortly after startup.
    pub onlyonce: bool,
    /// Cron cadence; absent when the form leaves it blank.
    pub cron: Option<CronSchedule>,
    /// Name of the downloader candidates are enumerated from.
    pub source_downloader: Option<String>,
    /// Name of the downloader torrents are added to.
    pub destination_downloader: Option<String>,
    /// Directory holding source `<info-hash>.torrent` files.
    pub torrent_dir: Option<PathBuf>,
    /// Cadence of the recheck poll job.
    pub recheck_interval: Duration,
    /// Poll attempts before a pending entry times out.
    pub max_recheck_attempts: u32,
    /// Deadline applied to each downloader call.
    pub call_timeout: Duration,
}

impl PluginSettings {
    fn from_form(form: &Map<String, Value>) -> ConfigResult<Self> {
        let cron = read_string(form, &["cron"])?
            .map(|expression| parse_cron(&expression))
            .transpose()?;
        let max_attempts = read_u64(
            form,
            &["max_recheck_attempts"],
            u64::from(DEFAULT_MAX_RECHECK_ATTEMPTS),
        )?;
        let max_recheck_attempts = u32::try_from(max_attempts).map_err(|_| {
            ConfigError::invalid(
                "max_recheck_attempts",
                Some(max_attempts.to_string()),
                "out_of_range",
            )
        })?;

        Ok(Self {
            enabled: read_bool(form, &["enabled"], false)?,
            notify: read_bool(form, &["notify"], false)?,
            onlyonce: read_bool(form, &["onlyonce"], false)?,
            cron,
            source_downloader: read_string(form, &["fromdownloader", "downloader"])?,
            destination_downloader: read_string(form, &["todownloader"])?,
            torrent_dir: read_string(form, &["fromtorrentpath"])?.map(PathBuf::from),
            recheck_interval: positive_secs(form, "recheck_interval", DEFAULT_RECHECK_INTERVAL)?,
            max_recheck_attempts,
            call_timeout: positive_secs(form, "call_timeout", DEFAULT_CALL_TIMEOUT)?,
        })
    }
}

fn positive_secs(
    form: &Map<String, Value>,
    key: &'static str,
    default: Duration,
) -> ConfigResult<Duration> {
    let secs = read_u64(form, &[key], default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::invalid(key, Some("0".into()), "must_be_positive"));
    }
    Ok(Duration::from_secs(secs))
}

/// Complete view of the flat settings form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Scheduling and wiring options.
    pub plugin: PluginSettings,
    /// Filter and action policy.
    pub policy: Policy,
}

impl Settings {
    /// Interpret a flat key-value form. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a recognised key carries a
    /// malformed value.
    pub fn from_form(form: &Map<String, Value>) -> ConfigResult<Self> {
        Ok(Self {
            plugin: PluginSettings::from_form(form)?,
            policy: Policy::from_form(form)?,
        })
    }
}

/// Supported downloader families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloaderKind {
    /// qBittorrent Web API v2.
    Qbittorrent,
    /// Transmission JSON-RPC.
    Transmission,
}

impl DownloaderKind {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qbittorrent => "qbittorrent",
            Self::Transmission => "transmission",
        }
    }
}

/// Connection details for one downloader.
#[derive(Clone, PartialEq, Eq)]
pub struct DownloaderEndpoint {
    /// Name the settings form refers to.
    pub name: String,
    /// Backend family.
    pub kind: DownloaderKind,
    /// Base URL of the client's web interface.
    pub url: Url,
    /// Optional login.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Adapter-level retries for transient failures.
    pub retries: u32,
}

impl fmt::Debug for DownloaderEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DownloaderEndpoint")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawEndpoint {
    kind: DownloaderKind,
    url: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    retries: Option<u32>,
}

impl RawEndpoint {
    pub(crate) fn into_endpoint(self, name: &str) -> ConfigResult<DownloaderEndpoint> {
        let field = format!("downloaders.{name}.url");
        let url = Url::parse(self.url.trim())
            .map_err(|_| ConfigError::invalid(field.clone(), Some(self.url.clone()), "invalid_url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                field,
                Some(self.url),
                "unsupported_scheme",
            ));
        }
        Ok(DownloaderEndpoint {
            name: name.to_string(),
            kind: self.kind,
            url,
            username: self.username.filter(|value| !value.trim().is_empty()),
            password: self.password.filter(|value| !value.is_empty()),
            timeout: Duration::from_secs(
                self.timeout_secs
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging section of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format; inferred from the build profile when absent.
    #[serde(default)]
    pub log_format: Option<LogFormat>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_format: None,
        }
    }
}

/// Fully loaded configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorsetConfig {
    /// Parsed settings form.
    pub settings: Settings,
    /// Declared downloaders keyed by name.
    pub downloaders: BTreeMap<String, DownloaderEndpoint>,
    /// Logging options.
    pub logging: LoggingSettings,
}

impl TorsetConfig {
    /// Check cross-field constraints that only matter when the job is enabled
    /// or a one-shot run is requested.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        let plugin = &self.settings.plugin;
        if !plugin.enabled && !plugin.onlyonce {
            return Ok(());
        }
        if plugin.enabled && plugin.cron.is_none() {
            return Err(ConfigError::MissingField { field: "cron" });
        }
        let source = self.resolve("fromdownloader", plugin.source_downloader.as_deref())?;
        let destination = self.resolve("todownloader", plugin.destination_downloader.as_deref())?;
        if source.name == destination.name {
            return Err(ConfigError::invalid(
                "todownloader",
                Some(destination.name.clone()),
                "same_as_source",
            ));
        }
        if plugin.torrent_dir.is_none() {
            return Err(ConfigError::MissingField {
                field: "fromtorrentpath",
            });
        }
        Ok(())
    }

    /// Endpoint the candidates are enumerated from.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is blank or not declared.
    pub fn source_endpoint(&self) -> ConfigResult<&DownloaderEndpoint> {
        self.resolve(
            "fromdownloader",
            self.settings.plugin.source_downloader.as_deref(),
        )
    }

    /// Endpoint torrents are added to.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is blank or not declared.
    pub fn destination_endpoint(&self) -> ConfigResult<&DownloaderEndpoint> {
        self.resolve(
            "todownloader",
            self.settings.plugin.destination_downloader.as_deref(),
        )
    }

    fn resolve(
        &self,
        field: &'static str,
        name: Option<&str>,
    ) -> ConfigResult<&DownloaderEndpoint> {
        let name = name.ok_or(ConfigError::MissingField { field })?;
        self.downloaders
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDownloader {
                field,
                name: name.to_string(),
            })
    }
}
