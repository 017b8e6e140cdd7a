//! Error types for reconciliation runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use torset_core::{AdapterError, TorrentId};

/// Failure raised by the reconciliation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another run (or poll) holds the run lock.
    #[error("reconciliation run already in progress")]
    RunInProgress,
    /// Candidate enumeration failed; the run was aborted before acting.
    #[error("source downloader unavailable")]
    BackendUnavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Adapter failure.
        #[source]
        source: AdapterError,
    },
    /// The torrent already has a pending verification entry.
    #[error("torrent already tracked")]
    AlreadyTracked {
        /// Identifier of the tracked torrent.
        torrent_id: TorrentId,
    },
    /// The `.torrent` file for a candidate could not be read.
    #[error("metainfo unavailable")]
    Metainfo {
        /// Identifier of the candidate.
        torrent_id: TorrentId,
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_stay_constant_and_sources_chain() {
        let err = EngineError::BackendUnavailable {
            operation: "list_completed",
            source: AdapterError::Timeout {
                backend: "qbittorrent",
                operation: "torrents.list",
            },
        };
        assert_eq!(err.to_string(), "source downloader unavailable");
        assert!(err.source().is_some());

        let err = EngineError::AlreadyTracked {
            torrent_id: TorrentId::new("abc"),
        };
        assert_eq!(err.to_string(), "torrent already tracked");
    }
}
