//! Error types for downloader adapter operations.
//!
//! # Design
//! - One enum shared by every backend so the engine can classify failures
//!   without knowing which client produced them.
//! - Context lives in fields (`backend`, `operation`); sources are preserved.

use std::error::Error;

use thiserror::Error;

use crate::model::TorrentId;

/// Boxed source error carried by adapter failures.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Failure raised by a downloader adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The client could not be reached or refused the session.
    #[error("{backend} unavailable during {operation}")]
    BackendUnavailable {
        /// Backend identifier.
        backend: &'static str,
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport failure.
        #[source]
        source: BoxError,
    },
    /// The client refused to admit a torrent.
    #[error("{backend} rejected torrent: {reason}")]
    AddRejected {
        /// Backend identifier.
        backend: &'static str,
        /// Reason reported by the client.
        reason: String,
    },
    /// The torrent is unknown to the client.
    #[error("torrent {torrent_id} not found on {backend}")]
    NotFound {
        /// Backend identifier.
        backend: &'static str,
        /// Missing torrent identifier.
        torrent_id: TorrentId,
    },
    /// The backend has no equivalent for the requested operation.
    #[error("{operation} not supported by {backend}")]
    Unsupported {
        /// Backend identifier.
        backend: &'static str,
        /// Operation identifier.
        operation: &'static str,
    },
    /// The call did not complete within its deadline.
    #[error("{backend} timed out during {operation}")]
    Timeout {
        /// Backend identifier.
        backend: &'static str,
        /// Operation identifier.
        operation: &'static str,
    },
    /// The client answered with something that could not be interpreted.
    #[error("unexpected {backend} response during {operation}: {detail}")]
    Protocol {
        /// Backend identifier.
        backend: &'static str,
        /// Operation identifier.
        operation: &'static str,
        /// What was wrong with the response.
        detail: String,
    },
}

/// Coarse classification of adapter failures used in run records and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// See [`AdapterError::BackendUnavailable`].
    BackendUnavailable,
    /// See [`AdapterError::AddRejected`].
    AddRejected,
    /// See [`AdapterError::NotFound`].
    NotFound,
    /// See [`AdapterError::Unsupported`].
    Unsupported,
    /// See [`AdapterError::Timeout`].
    Timeout,
    /// See [`AdapterError::Protocol`].
    Protocol,
}

impl AdapterErrorKind {
    /// Render the kind as its canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::AddRejected => "add_rejected",
            Self::NotFound => "not_found",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
        }
    }
}

impl AdapterError {
    /// Build a [`AdapterError::BackendUnavailable`] from any transport error.
    pub fn unavailable(
        backend: &'static str,
        operation: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::BackendUnavailable {
            backend,
            operation,
            source: source.into(),
        }
    }

    /// Build a [`AdapterError::Protocol`] error.
    pub fn protocol(
        backend: &'static str,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            backend,
            operation,
            detail: detail.into(),
        }
    }

    /// Classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> AdapterErrorKind {
        match self {
            Self::BackendUnavailable { .. } => AdapterErrorKind::BackendUnavailable,
            Self::AddRejected { .. } => AdapterErrorKind::AddRejected,
            Self::NotFound { .. } => AdapterErrorKind::NotFound,
            Self::Unsupported { .. } => AdapterErrorKind::Unsupported,
            Self::Timeout { .. } => AdapterErrorKind::Timeout,
            Self::Protocol { .. } => AdapterErrorKind::Protocol,
        }
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the failure means the backend cannot be reached at all.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Convenience alias for adapter results.
pub type AdapterResult<T> = Result<T, AdapterError>;
