//! Core torrent domain types shared across the workspace.
//!
//! # Design
//! - Snapshots are read-only views produced by adapters; the engine never
//!   mutates them.
//! - Backend quirks (comma-joined tag strings, missing categories, checking
//!   states) are normalised here or in the adapters so the engine sees one
//!   shape regardless of which client produced it.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Backend-native torrent identifier (the lowercase info-hash for every
/// supported client). Treated as an opaque key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentId(String);

impl TorrentId {
    /// Build an identifier, trimming whitespace and lowercasing hex digits.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TorrentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for TorrentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TorrentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Normalised set of labels attached to a torrent.
///
/// Empty and whitespace-only entries are always discarded, so an unlabelled
/// torrent is an empty set and never a singleton holding `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    /// Empty label set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a comma-joined label field (e.g. qBittorrent `tags`).
    #[must_use]
    pub fn parse_joined(raw: &str) -> Self {
        Self::from_list(raw.split(','))
    }

    /// Build a set from a native list (e.g. Transmission `labels`).
    pub fn from_list<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            labels
                .into_iter()
                .map(|label| label.as_ref().trim().to_string())
                .filter(|label| !label.is_empty())
                .collect(),
        )
    }

    /// Whether the set carries no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of labels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `label` is a member of the set.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// Whether the two sets share at least one label.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.0.iter().any(|label| large.0.contains(label))
    }

    /// Insert a label; blank labels are ignored.
    pub fn insert(&mut self, label: impl AsRef<str>) -> bool {
        let label = label.as_ref().trim();
        if label.is_empty() {
            return false;
        }
        self.0.insert(label.to_string())
    }

    /// Iterate labels in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Render the set as a comma-joined string (backend A wire form).
    #[must_use]
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }
}

impl<S: AsRef<str>> FromIterator<S> for LabelSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::from_list(iter)
    }
}

/// Lifecycle state of a torrent as far as reconciliation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Payload is still being fetched.
    Downloading,
    /// Payload is complete on disk (seeding, or stopped at 100 %).
    Completed,
    /// The client reports an error (missing files, I/O failure, ...).
    Error,
    /// Stopped before completion.
    Paused,
    /// Anything else, including queued and hash-checking states.
    Other,
}

impl TorrentState {
    /// Render the state as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Paused => "paused",
            Self::Other => "other",
        }
    }
}

/// Read-only view of one torrent at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Backend-native identifier.
    pub id: TorrentId,
    /// Display name reported by the client.
    pub name: String,
    /// Normalised labels.
    pub labels: LabelSet,
    /// Category; only backends with a category model ever populate it.
    pub category: Option<String>,
    /// Directory the payload is saved under.
    pub save_path: String,
    /// Normalised lifecycle state.
    pub state: TorrentState,
    /// Current upload rate in bytes per second.
    pub upload_speed: u64,
    /// Current download rate in bytes per second.
    pub download_speed: u64,
}

impl TorrentSnapshot {
    /// Whether the payload is complete and therefore a reconciliation candidate.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == TorrentState::Completed
    }
}

/// Per-torrent rate limiting knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum upload rate in bytes per second.
    pub upload_bps: Option<u64>,
    /// Maximum download rate in bytes per second.
    pub download_bps: Option<u64>,
}

impl RateLimit {
    /// Whether neither direction is capped.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.upload_bps.is_none() && self.download_bps.is_none()
    }
}

/// Request payload for admitting a torrent into a downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTorrent {
    /// Bencoded `.torrent` metainfo.
    pub metainfo: Vec<u8>,
    /// Directory the payload should be saved under.
    pub download_dir: String,
    /// Whether the torrent should be admitted stopped.
    pub start_paused: bool,
    /// Tags applied on admission, in the order supplied.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Options accompanying torrent removal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RemoveTorrent {
    /// Whether payload data should be deleted alongside the client record.
    pub with_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_labels_drop_blank_members() {
        let labels = LabelSet::parse_joined("a, b,");
        assert_eq!(labels.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!labels.contains(""));
    }

    #[test]
    fn empty_label_fields_normalise_to_empty_set() {
        assert!(LabelSet::parse_joined("").is_empty());
        assert!(LabelSet::parse_joined(" , ,").is_empty());
        assert!(LabelSet::from_list(Vec::<String>::new()).is_empty());
        assert!(LabelSet::from_list([""]).is_empty());
    }

    #[test]
    fn label_sets_intersect_on_shared_member() {
        let left = LabelSet::from_list(["movies", "hd"]);
        let right = LabelSet::from_list(["tv", "hd"]);
        let other = LabelSet::from_list(["music"]);
        assert!(left.intersects(&right));
        assert!(right.intersects(&left));
        assert!(!left.intersects(&other));
        assert!(!left.intersects(&LabelSet::new()));
    }

    #[test]
    fn torrent_ids_are_case_insensitive() {
        assert_eq!(TorrentId::new(" ABCDEF "), TorrentId::from("abcdef"));
        assert_eq!(TorrentId::new("ABC").to_string(), "abc");
    }

    #[test]
    fn joined_rendering_is_sorted() {
        let mut labels = LabelSet::from_list(["zeta", "alpha"]);
        assert!(!labels.insert("  "));
        assert!(labels.insert("mid"));
        assert_eq!(labels.joined(), "alpha,mid,zeta");
    }

    #[test]
    fn rate_limit_reports_unlimited() {
        assert!(RateLimit::default().is_unlimited());
        assert!(
            !RateLimit {
                upload_bps: Some(1),
                download_bps: None
            }
            .is_unlimited()
        );
    }
}
