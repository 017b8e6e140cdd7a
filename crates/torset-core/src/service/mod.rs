//! Capability interface implemented by every downloader backend.

use async_trait::async_trait;

use crate::error::{AdapterError, AdapterResult};
use crate::model::{AddTorrent, LabelSet, RateLimit, RemoveTorrent, TorrentId, TorrentSnapshot};

/// Uniform surface over a torrent client.
///
/// Implementations own their wire protocol and normalise backend quirks
/// (label encoding, category support, checking states) before handing
/// snapshots out. Callers never branch on which backend they hold.
#[async_trait]
pub trait DownloaderAdapter: Send + Sync {
    /// Short backend identifier used in logs and error context.
    fn backend(&self) -> &'static str;

    /// Enumerate torrents whose payload is complete.
    ///
    /// Either a full consistent listing or an error; never a partial list.
    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>>;

    /// Admit a torrent and return the identifier the client assigned to it.
    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId>;

    /// Replace the labels attached to a torrent.
    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()>;

    /// Assign (or clear) the category; default implementation reports lack of support.
    async fn set_category(&self, id: &TorrentId, category: Option<&str>) -> AdapterResult<()> {
        let _ = (id, category);
        Err(AdapterError::Unsupported {
            backend: self.backend(),
            operation: "set_category",
        })
    }

    /// Apply per-torrent rate limits.
    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()>;

    /// Remove the client record, optionally deleting payload data.
    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()>;

    /// Ask the client to re-hash on-disk data.
    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()>;

    /// Start (or resume) a stopped torrent.
    async fn resume(&self, id: &TorrentId) -> AdapterResult<()>;

    /// Fetch the current snapshot of a single torrent.
    ///
    /// Fails with [`AdapterError::NotFound`] when the client does not know the id.
    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot>;

    /// Whether the client currently holds a torrent with this id.
    async fn contains(&self, id: &TorrentId) -> AdapterResult<bool> {
        match self.get_state(id).await {
            Ok(_) => Ok(true),
            Err(AdapterError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
