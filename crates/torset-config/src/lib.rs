#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(clippy::all, clippy::pedantic, missing_docs)]

//! Configuration facade for the reconciliation engine.
//!
//! Layout: `model.rs` (typed policy, plugin settings, downloader endpoints),
//! `validate.rs` (parsing helpers for the flat key-value form), `loader.rs`
//! (file/env loading), `defaults.rs` (default values).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use defaults::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RECHECK_ATTEMPTS, DEFAULT_RECHECK_INTERVAL, ONE_SHOT_DELAY,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, load_config, load_config_from_env, parse_config};
pub use model::{
    CronSchedule, DownloaderEndpoint, DownloaderKind, LogFormat, LoggingSettings, PluginSettings,
    Policy, RateRule, Settings, TorsetConfig,
};
