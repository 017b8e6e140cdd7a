//! Web API payloads and their normalisation into core snapshots.

use serde::Deserialize;
use torset_core::{AdapterError, AdapterResult, LabelSet, TorrentId, TorrentSnapshot, TorrentState};

use crate::client::BACKEND;

/// Row returned by `/api/v2/torrents/info`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct QbTorrentEntry {
    pub hash: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "tags", default)]
    pub tag_list: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "upspeed", default)]
    pub upload_speed: i64,
    #[serde(rename = "dlspeed", default)]
    pub download_speed: i64,
}

impl QbTorrentEntry {
    pub(crate) fn into_snapshot(self, operation: &'static str) -> AdapterResult<TorrentSnapshot> {
        if self.hash.trim().is_empty() {
            return Err(AdapterError::protocol(
                BACKEND,
                operation,
                "torrent entry without hash",
            ));
        }
        let category = self.category.trim();
        Ok(TorrentSnapshot {
            id: TorrentId::new(&self.hash),
            labels: LabelSet::parse_joined(&self.tag_list),
            category: (!category.is_empty()).then(|| category.to_string()),
            state: map_state(&self.state),
            upload_speed: u64::try_from(self.upload_speed).unwrap_or(0),
            download_speed: u64::try_from(self.download_speed).unwrap_or(0),
            name: self.name,
            save_path: self.save_path,
        })
    }
}

/// Map a qBittorrent state string onto the core lifecycle.
///
/// Seeding states, including paused/stopped at 100 %, count as completed.
/// Hash-checking states are `Other` so a recheck in progress never reads as
/// verified.
pub(crate) fn map_state(raw: &str) -> TorrentState {
    match raw {
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "forcedUP" => {
            TorrentState::Completed
        }
        "downloading" | "stalledDL" | "metaDL" | "forcedMetaDL" | "forcedDL" | "queuedDL"
        | "allocating" => TorrentState::Downloading,
        "pausedDL" | "stoppedDL" => TorrentState::Paused,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Other,
    }
}
