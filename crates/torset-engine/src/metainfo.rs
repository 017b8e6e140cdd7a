//! Lookup of `.torrent` metainfo for reconciliation candidates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use torset_core::TorrentId;

use crate::error::{EngineError, EngineResult};

/// Source of bencoded metainfo keyed by info-hash.
#[async_trait]
pub trait MetainfoStore: Send + Sync {
    /// Read the metainfo for `id`.
    async fn load(&self, id: &TorrentId) -> EngineResult<Vec<u8>>;
}

/// Reads `<root>/<info-hash>.torrent`.
#[derive(Debug, Clone)]
pub struct FsMetainfoStore {
    root: PathBuf,
}

impl FsMetainfoStore {
    /// Store rooted at the source client's torrent directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the store reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &TorrentId) -> PathBuf {
        self.root.join(format!("{id}.torrent"))
    }
}

#[async_trait]
impl MetainfoStore for FsMetainfoStore {
    async fn load(&self, id: &TorrentId) -> EngineResult<Vec<u8>> {
        let path = self.path_for(id);
        tokio::fs::read(&path)
            .await
            .map_err(|source| EngineError::Metainfo {
                torrent_id: id.clone(),
                path,
                source,
            })
    }
}
