//! Snapshot and policy builders.

use torset_config::Policy;
use torset_core::{LabelSet, TorrentId, TorrentSnapshot, TorrentState};

/// Completed torrent carrying `labels`, saved under `save_path`.
#[must_use]
pub fn completed_torrent(id: &str, labels: &[&str], save_path: &str) -> TorrentSnapshot {
    TorrentSnapshot {
        id: TorrentId::new(id),
        name: format!("torrent-{id}"),
        labels: LabelSet::from_list(labels),
        category: None,
        save_path: save_path.to_string(),
        state: TorrentState::Completed,
        upload_speed: 0,
        download_speed: 0,
    }
}

/// Torrent in an arbitrary lifecycle state.
#[must_use]
pub fn torrent_in_state(id: &str, state: TorrentState) -> TorrentSnapshot {
    TorrentSnapshot {
        state,
        ..completed_torrent(id, &["tv"], "/downloads/tv")
    }
}

/// `count` completed torrents labelled `tv`, ids `hash-00` onwards.
#[must_use]
pub fn completed_batch(count: usize) -> Vec<TorrentSnapshot> {
    (0..count)
        .map(|index| completed_torrent(&format!("hash-{index:02}"), &["tv"], "/downloads/tv"))
        .collect()
}

/// Policy relocating `/downloads` to `/seed` and tagging transfers `moved`.
#[must_use]
pub fn transfer_policy() -> Policy {
    Policy {
        source_path: Some("/downloads".into()),
        dest_path: Some("/seed".into()),
        extra_tags: vec!["moved".into()],
        ..Policy::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_ids_are_distinct_and_completed() {
        let batch = completed_batch(12);
        assert_eq!(batch.len(), 12);
        assert_eq!(batch[0].id.as_str(), "hash-00");
        assert_eq!(batch[11].id.as_str(), "hash-11");
        assert!(batch.iter().all(TorrentSnapshot::is_completed));
    }

    #[test]
    fn state_override_keeps_other_fields() {
        let torrent = torrent_in_state("abc", TorrentState::Downloading);
        assert!(!torrent.is_completed());
        assert!(torrent.labels.contains("tv"));
    }
}
