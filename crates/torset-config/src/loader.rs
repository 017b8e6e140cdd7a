//! File and environment loading for the configuration document.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LoggingSettings, RawEndpoint, Settings, TorsetConfig};

/// Environment variable naming the configuration document path.
pub const CONFIG_PATH_ENV: &str = "TORSET_CONFIG";

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    settings: Map<String, Value>,
    #[serde(default)]
    downloaders: BTreeMap<String, RawEndpoint>,
    #[serde(default)]
    logging: LoggingSettings,
}

/// Parse and validate a configuration document held in memory.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed JSON and the validation error
/// for well-formed documents that violate a constraint.
pub fn parse_config(document: &str) -> ConfigResult<TorsetConfig> {
    parse_with_path(document, None)
}

fn parse_with_path(document: &str, path: Option<&Path>) -> ConfigResult<TorsetConfig> {
    let raw: RawDocument =
        serde_json::from_str(document).map_err(|source| ConfigError::Parse {
            path: path.map(Path::to_path_buf),
            source,
        })?;

    let settings = Settings::from_form(&raw.settings)?;
    let downloaders = raw
        .downloaders
        .into_iter()
        .map(|(name, endpoint)| {
            let endpoint = endpoint.into_endpoint(&name)?;
            Ok((name, endpoint))
        })
        .collect::<ConfigResult<BTreeMap<_, _>>>()?;

    let config = TorsetConfig {
        settings,
        downloaders,
        logging: raw.logging,
    };
    config.validate()?;
    debug!(
        downloaders = config.downloaders.len(),
        enabled = config.settings.plugin.enabled,
        "configuration parsed"
    );
    Ok(config)
}

/// Load and validate the configuration document at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
/// errors of [`parse_config`].
pub async fn load_config(path: impl AsRef<Path>) -> ConfigResult<TorsetConfig> {
    let path = path.as_ref();
    let document = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
    let config = parse_with_path(&document, Some(path))?;
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load the configuration document named by [`CONFIG_PATH_ENV`].
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] when the variable is unset or blank,
/// otherwise the errors of [`load_config`].
pub async fn load_config_from_env() -> ConfigResult<TorsetConfig> {
    let path = env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingEnv {
            name: CONFIG_PATH_ENV,
        })?;
    load_config(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DownloaderKind;

    const DOCUMENT: &str = r#"{
        "settings": {
            "enabled": true,
            "cron": "0 */2 * * *",
            "downloader": "qb",
            "todownloader": "tr",
            "fromtorrentpath": "/config/BT_backup"
        },
        "downloaders": {
            "qb": {"kind": "qbittorrent", "url": "http://qb:8080", "username": "admin", "password": "secret"},
            "tr": {"kind": "transmission", "url": "http://tr:9091/transmission/rpc", "retries": 0}
        },
        "logging": {"level": "debug", "log_format": "json"}
    }"#;

    #[test]
    fn parses_complete_document() -> ConfigResult<()> {
        let config = parse_config(DOCUMENT)?;
        assert_eq!(config.source_endpoint()?.kind, DownloaderKind::Qbittorrent);
        assert_eq!(
            config.destination_endpoint()?.kind,
            DownloaderKind::Transmission
        );
        assert_eq!(config.destination_endpoint()?.retries, 0);
        assert_eq!(config.logging.level, "debug");
        Ok(())
    }

    #[test]
    fn enabled_config_requires_known_downloaders() {
        let document = DOCUMENT.replace("\"todownloader\": \"tr\"", "\"todownloader\": \"nope\"");
        let err = parse_config(&document).expect_err("unknown downloader rejected");
        assert!(matches!(
            err,
            ConfigError::UnknownDownloader {
                field: "todownloader",
                ..
            }
        ));
    }

    #[test]
    fn source_and_destination_must_differ() {
        let document = DOCUMENT.replace("\"todownloader\": \"tr\"", "\"todownloader\": \"qb\"");
        let err = parse_config(&document).expect_err("same downloader rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                reason: "same_as_source",
                ..
            }
        ));
    }

    #[test]
    fn enabled_config_requires_torrent_dir() {
        let document = DOCUMENT.replace("\"/config/BT_backup\"", "\"\"");
        let err = parse_config(&document).expect_err("missing torrent dir rejected");
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "fromtorrentpath"
            }
        ));
    }

    #[test]
    fn disabled_config_skips_cross_checks() -> ConfigResult<()> {
        let config = parse_config(r#"{"settings": {"enabled": false}}"#)?;
        assert!(config.downloaders.is_empty());
        assert!(config.settings.plugin.cron.is_none());
        Ok(())
    }

    #[test]
    fn malformed_json_reports_parse_error() {
        let err = parse_config("{not json").expect_err("parse error");
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }
}
