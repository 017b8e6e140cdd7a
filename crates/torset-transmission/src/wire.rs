//! RPC payloads and status normalisation.

use serde::Deserialize;
use torset_core::{AdapterError, AdapterResult, LabelSet, TorrentId, TorrentSnapshot, TorrentState};

use crate::rpc::BACKEND;

/// Fields requested from `torrent-get`.
pub(crate) const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "labels",
    "downloadDir",
    "status",
    "percentDone",
    "error",
    "rateUpload",
    "rateDownload",
];

const STATUS_STOPPED: i64 = 0;
const STATUS_CHECK_WAIT: i64 = 1;
const STATUS_CHECKING: i64 = 2;
const STATUS_DOWNLOAD_WAIT: i64 = 3;
const STATUS_DOWNLOADING: i64 = 4;
const STATUS_SEED_WAIT: i64 = 5;
const STATUS_SEEDING: i64 = 6;
const ERROR_LOCAL: i64 = 3;

#[derive(Debug, Deserialize)]
pub(crate) struct TorrentList {
    #[serde(default)]
    pub torrents: Vec<TrTorrent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrTorrent {
    pub hash_string: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub download_dir: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub percent_done: f64,
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub rate_upload: i64,
    #[serde(default)]
    pub rate_download: i64,
}

impl TrTorrent {
    pub(crate) fn into_snapshot(self, operation: &'static str) -> AdapterResult<TorrentSnapshot> {
        if self.hash_string.trim().is_empty() {
            return Err(AdapterError::protocol(
                BACKEND,
                operation,
                "torrent without hashString",
            ));
        }
        Ok(TorrentSnapshot {
            id: TorrentId::new(&self.hash_string),
            labels: LabelSet::from_list(self.labels.unwrap_or_default()),
            category: None,
            state: map_status(self.status, self.percent_done, self.error),
            upload_speed: u64::try_from(self.rate_upload).unwrap_or(0),
            download_speed: u64::try_from(self.rate_download).unwrap_or(0),
            name: self.name,
            save_path: self.download_dir,
        })
    }
}

/// Map Transmission's numeric status onto the core lifecycle.
///
/// A stopped torrent whose payload is fully present counts as completed.
pub(crate) fn map_status(status: i64, percent_done: f64, error: i64) -> TorrentState {
    if error == ERROR_LOCAL {
        return TorrentState::Error;
    }
    match status {
        STATUS_STOPPED if percent_done >= 1.0 => TorrentState::Completed,
        STATUS_STOPPED => TorrentState::Paused,
        STATUS_CHECK_WAIT | STATUS_CHECKING => TorrentState::Other,
        STATUS_DOWNLOAD_WAIT | STATUS_DOWNLOADING => TorrentState::Downloading,
        STATUS_SEED_WAIT | STATUS_SEEDING => TorrentState::Completed,
        _ => TorrentState::Other,
    }
}

/// `torrent-add` response arguments.
#[derive(Debug, Deserialize)]
pub(crate) struct AddedTorrent {
    #[serde(rename = "torrent-added")]
    pub added: Option<AddedEntry>,
    #[serde(rename = "torrent-duplicate")]
    pub duplicate: Option<AddedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddedEntry {
    pub hash_string: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_mapping_treats_stopped_complete_as_completed() {
        assert_eq!(map_status(0, 1.0, 0), TorrentState::Completed);
        assert_eq!(map_status(0, 0.4, 0), TorrentState::Paused);
        assert_eq!(map_status(2, 0.5, 0), TorrentState::Other);
        assert_eq!(map_status(4, 0.5, 0), TorrentState::Downloading);
        assert_eq!(map_status(6, 1.0, 0), TorrentState::Completed);
        assert_eq!(map_status(6, 1.0, 3), TorrentState::Error);
        assert_eq!(map_status(6, 1.0, 2), TorrentState::Completed);
    }

    #[test]
    fn native_label_lists_normalise() -> anyhow::Result<()> {
        let torrent: TrTorrent = serde_json::from_value(json!({
            "hashString": "BEEF",
            "name": "demo",
            "labels": ["tv", "", " hd "],
            "downloadDir": "/seed/tv",
            "status": 6,
            "percentDone": 1.0,
            "error": 0,
            "rateUpload": 100,
            "rateDownload": 0
        }))?;
        let snapshot = torrent.into_snapshot("torrent.get")?;
        assert_eq!(snapshot.id.as_str(), "beef");
        assert_eq!(snapshot.labels, LabelSet::from_list(["tv", "hd"]));
        assert_eq!(snapshot.category, None);
        assert_eq!(snapshot.save_path, "/seed/tv");
        Ok(())
    }

    #[test]
    fn absent_labels_are_an_empty_set() -> anyhow::Result<()> {
        let torrent: TrTorrent =
            serde_json::from_value(json!({"hashString": "beef", "labels": null}))?;
        assert!(torrent.into_snapshot("torrent.get")?.labels.is_empty());
        Ok(())
    }
}
