//! Per-call deadline around a downloader adapter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use torset_core::{
    AddTorrent, AdapterError, AdapterResult, DownloaderAdapter, LabelSet, RateLimit,
    RemoveTorrent, TorrentId, TorrentSnapshot,
};
use tracing::warn;

/// Adapter decorator that bounds every call by a fixed deadline.
///
/// An expired call surfaces as [`AdapterError::Timeout`]; the inner future is
/// dropped.
#[derive(Clone)]
pub struct TimedAdapter {
    inner: Arc<dyn DownloaderAdapter>,
    deadline: Duration,
}

impl TimedAdapter {
    /// Wrap `inner` with `deadline`.
    #[must_use]
    pub fn new(inner: Arc<dyn DownloaderAdapter>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = AdapterResult<T>> + Send,
    ) -> AdapterResult<T> {
        if let Ok(result) = timeout(self.deadline, call).await {
            result
        } else {
            let backend = self.inner.backend();
            warn!(
                backend,
                operation,
                deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
                "downloader call exceeded its deadline"
            );
            Err(AdapterError::Timeout { backend, operation })
        }
    }
}

#[async_trait]
impl DownloaderAdapter for TimedAdapter {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
        self.bounded("list_completed", self.inner.list_completed())
            .await
    }

    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId> {
        self.bounded("add_torrent", self.inner.add_torrent(request))
            .await
    }

    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()> {
        self.bounded("set_labels", self.inner.set_labels(id, labels))
            .await
    }

    async fn set_category(&self, id: &TorrentId, category: Option<&str>) -> AdapterResult<()> {
        self.bounded("set_category", self.inner.set_category(id, category))
            .await
    }

    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()> {
        self.bounded("set_rate_limits", self.inner.set_rate_limits(id, limits))
            .await
    }

    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()> {
        self.bounded("remove_torrent", self.inner.remove_torrent(id, options))
            .await
    }

    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()> {
        self.bounded("recheck", self.inner.recheck(id)).await
    }

    async fn resume(&self, id: &TorrentId) -> AdapterResult<()> {
        self.bounded("resume", self.inner.resume(id)).await
    }

    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
        self.bounded("get_state", self.inner.get_state(id)).await
    }

    async fn contains(&self, id: &TorrentId) -> AdapterResult<bool> {
        self.bounded("contains", self.inner.contains(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torset_test_support::ScriptedDownloader;
    use torset_test_support::fixtures::completed_torrent;

    struct Stalled;

    #[async_trait]
    impl DownloaderAdapter for Stalled {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
            std::future::pending().await
        }

        async fn add_torrent(&self, _request: AddTorrent) -> AdapterResult<TorrentId> {
            std::future::pending().await
        }

        async fn set_labels(&self, _id: &TorrentId, _labels: &LabelSet) -> AdapterResult<()> {
            std::future::pending().await
        }

        async fn set_rate_limits(&self, _id: &TorrentId, _limits: RateLimit) -> AdapterResult<()> {
            std::future::pending().await
        }

        async fn remove_torrent(
            &self,
            _id: &TorrentId,
            _options: RemoveTorrent,
        ) -> AdapterResult<()> {
            std::future::pending().await
        }

        async fn recheck(&self, _id: &TorrentId) -> AdapterResult<()> {
            std::future::pending().await
        }

        async fn resume(&self, _id: &TorrentId) -> AdapterResult<()> {
            std::future::pending().await
        }

        async fn get_state(&self, _id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_calls_become_timeouts() {
        let adapter = TimedAdapter::new(Arc::new(Stalled), Duration::from_millis(20));
        let err = adapter
            .list_completed()
            .await
            .expect_err("never answers");
        assert!(matches!(
            err,
            AdapterError::Timeout {
                backend: "stalled",
                operation: "list_completed"
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn prompt_calls_pass_through() -> anyhow::Result<()> {
        let inner = ScriptedDownloader::with_torrents(
            "dest",
            vec![completed_torrent("abc", &["tv"], "/seed")],
        );
        let adapter = TimedAdapter::new(Arc::new(inner), Duration::from_secs(1));
        assert_eq!(adapter.backend(), "dest");
        assert_eq!(adapter.list_completed().await?.len(), 1);
        assert!(adapter.contains(&TorrentId::new("abc")).await?);
        assert!(!adapter.contains(&TorrentId::new("def")).await?);
        Ok(())
    }
}
