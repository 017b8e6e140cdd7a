//! `DownloaderAdapter` over Transmission RPC.
//!
//! Transmission has no category model, so `set_category` keeps the trait's
//! default `Unsupported` answer. Labels are a native list.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::de::IgnoredAny;
use serde_json::{Value, json};
use torset_core::{
    AddTorrent, AdapterError, AdapterResult, DownloaderAdapter, LabelSet, RateLimit,
    RemoveTorrent, RetryPolicy, TorrentId, TorrentSnapshot,
};
use tracing::{info, warn};

use crate::rpc::{BACKEND, RpcClient, TransmissionConfig};
use crate::wire::{AddedTorrent, TORRENT_FIELDS, TorrentList};

/// Transmission speed limits are expressed in kB/s.
const SPEED_UNIT_BYTES: u64 = 1_000;

/// Adapter over a Transmission daemon.
pub struct TransmissionAdapter {
    rpc: RpcClient,
}

impl TransmissionAdapter {
    /// Build an adapter; the session id is negotiated on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BackendUnavailable`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: TransmissionConfig) -> AdapterResult<Self> {
        Ok(Self {
            rpc: RpcClient::new(config)?,
        })
    }

    async fn torrents(
        &self,
        operation: &'static str,
        ids: Option<&TorrentId>,
    ) -> AdapterResult<Vec<TorrentSnapshot>> {
        let mut arguments = json!({ "fields": TORRENT_FIELDS });
        if let Some(id) = ids {
            arguments["ids"] = json!([id.as_str()]);
        }
        let list: Option<TorrentList> = self
            .rpc
            .invoke(operation, "torrent-get", arguments)
            .await?;
        list.map(|list| list.torrents)
            .unwrap_or_default()
            .into_iter()
            .map(|torrent| torrent.into_snapshot(operation))
            .collect()
    }

    async fn mutate(
        &self,
        operation: &'static str,
        method: &'static str,
        arguments: Value,
    ) -> AdapterResult<()> {
        let _: Option<IgnoredAny> = self.rpc.invoke(operation, method, arguments).await?;
        Ok(())
    }
}

fn speed_limit(bps: Option<u64>) -> (bool, u64) {
    bps.map_or((false, 0), |bps| (true, bps.div_ceil(SPEED_UNIT_BYTES).max(1)))
}

#[async_trait]
impl DownloaderAdapter for TransmissionAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
        let mut snapshots = self.torrents("torrent.list", None).await?;
        snapshots.retain(TorrentSnapshot::is_completed);
        Ok(snapshots)
    }

    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId> {
        let mut arguments = json!({
            "metainfo": STANDARD.encode(&request.metainfo),
            "download-dir": request.download_dir,
            "paused": request.start_paused,
        });
        if !request.tags.is_empty() {
            arguments["labels"] = json!(request.tags);
        }
        let envelope = self
            .rpc
            .call::<AddedTorrent>(RetryPolicy::none(), "torrent.add", "torrent-add", arguments)
            .await?;
        if !envelope.is_success() {
            return Err(AdapterError::AddRejected {
                backend: BACKEND,
                reason: envelope.result,
            });
        }
        let added = envelope.arguments.ok_or_else(|| {
            AdapterError::protocol(BACKEND, "torrent.add", "missing response arguments")
        })?;
        if let Some(existing) = added.duplicate {
            warn!(
                backend = BACKEND,
                torrent_id = %existing.hash_string.to_ascii_lowercase(),
                "torrent already present; add rejected"
            );
            return Err(AdapterError::AddRejected {
                backend: BACKEND,
                reason: "duplicate".into(),
            });
        }
        let entry = added.added.ok_or_else(|| {
            AdapterError::protocol(BACKEND, "torrent.add", "response names no torrent")
        })?;
        let id = TorrentId::new(entry.hash_string);
        info!(backend = BACKEND, torrent_id = %id, "torrent added");
        Ok(id)
    }

    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()> {
        let labels: Vec<&str> = labels.iter().collect();
        self.mutate(
            "torrent.set_labels",
            "torrent-set",
            json!({ "ids": [id.as_str()], "labels": labels }),
        )
        .await
    }

    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()> {
        let (upload_limited, upload_limit) = speed_limit(limits.upload_bps);
        let (download_limited, download_limit) = speed_limit(limits.download_bps);
        self.mutate(
            "torrent.set_limits",
            "torrent-set",
            json!({
                "ids": [id.as_str()],
                "uploadLimited": upload_limited,
                "uploadLimit": upload_limit,
                "downloadLimited": download_limited,
                "downloadLimit": download_limit,
            }),
        )
        .await
    }

    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()> {
        self.mutate(
            "torrent.remove",
            "torrent-remove",
            json!({ "ids": [id.as_str()], "delete-local-data": options.with_data }),
        )
        .await
    }

    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()> {
        self.mutate(
            "torrent.verify",
            "torrent-verify",
            json!({ "ids": [id.as_str()] }),
        )
        .await
    }

    async fn resume(&self, id: &TorrentId) -> AdapterResult<()> {
        self.mutate(
            "torrent.start",
            "torrent-start",
            json!({ "ids": [id.as_str()] }),
        )
        .await
    }

    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
        self.torrents("torrent.get", Some(id))
            .await?
            .into_iter()
            .find(|snapshot| &snapshot.id == id)
            .ok_or_else(|| AdapterError::NotFound {
                backend: BACKEND,
                torrent_id: id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;

    const RPC_PATH: &str = "/transmission/rpc";

    fn adapter_for(server: &MockServer) -> TransmissionAdapter {
        TransmissionAdapter::new(TransmissionConfig {
            rpc_url: server.url(RPC_PATH).parse().expect("valid URL"),
            username: Some("admin".into()),
            password: Some("secret".into()),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        })
        .expect("client builds")
    }

    fn torrent(hash: &str, status: i64, percent_done: f64) -> Value {
        json!({
            "hashString": hash,
            "name": format!("torrent-{hash}"),
            "labels": ["tv"],
            "downloadDir": "/downloads/tv",
            "status": status,
            "percentDone": percent_done,
            "error": 0,
            "rateUpload": 0,
            "rateDownload": 0
        })
    }

    #[tokio::test]
    async fn session_handshake_then_list_completed() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let accepted = server.mock(|when, then| {
            when.method(POST)
                .path(RPC_PATH)
                .header("x-transmission-session-id", "session-1");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "result": "success",
                    "arguments": {"torrents": [
                        torrent("AAA", 6, 1.0),
                        torrent("bbb", 4, 0.3),
                        torrent("ccc", 0, 1.0)
                    ]}
                }));
        });
        let handshake = server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(409)
                .header("X-Transmission-Session-Id", "session-1");
        });

        let adapter = adapter_for(&server);
        let snapshots = adapter.list_completed().await?;
        handshake.assert();
        accepted.assert();
        let ids: Vec<&str> = snapshots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "ccc"]);
        assert!(snapshots[0].labels.contains("tv"));
        Ok(())
    }

    #[tokio::test]
    async fn add_returns_hash_string() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let add = server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "result": "success",
                    "arguments": {"torrent-added": {"hashString": "F00D", "id": 1, "name": "demo"}}
                }));
        });

        let adapter = adapter_for(&server);
        let id = adapter
            .add_torrent(AddTorrent {
                metainfo: b"d4:infod4:name4:demoee".to_vec(),
                download_dir: "/seed".into(),
                start_paused: true,
                tags: vec!["moved".into()],
            })
            .await?;
        assert_eq!(id.as_str(), "f00d");
        add.assert();
        Ok(())
    }

    #[tokio::test]
    async fn failed_add_result_is_add_rejected() {
        let server = MockServer::start_async().await;
        let add = server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"result": "invalid or corrupt torrent file"}));
        });

        let adapter = adapter_for(&server);
        let err = adapter
            .add_torrent(AddTorrent {
                metainfo: Vec::new(),
                download_dir: "/seed".into(),
                start_paused: true,
                tags: Vec::new(),
            })
            .await
            .expect_err("corrupt metainfo");
        assert!(
            matches!(err, AdapterError::AddRejected { reason, .. } if reason.contains("corrupt"))
        );
        add.assert_hits(1);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "result": "success",
                    "arguments": {"torrent-duplicate": {"hashString": "F00D", "id": 1, "name": "demo"}}
                }));
        });

        let adapter = adapter_for(&server);
        let err = adapter
            .add_torrent(AddTorrent {
                metainfo: b"d4:infod4:name4:demoee".to_vec(),
                download_dir: "/seed".into(),
                start_paused: true,
                tags: Vec::new(),
            })
            .await
            .expect_err("already present");
        assert!(
            matches!(err, AdapterError::AddRejected { ref reason, .. } if reason == "duplicate")
        );
        assert_eq!(err.kind(), torset_core::AdapterErrorKind::AddRejected);
    }

    #[tokio::test]
    async fn missing_torrent_is_not_found() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"result": "success", "arguments": {"torrents": []}}));
        });

        let adapter = adapter_for(&server);
        let err = adapter
            .get_state(&TorrentId::new("dead"))
            .await
            .expect_err("unknown torrent");
        assert!(matches!(err, AdapterError::NotFound { .. }));
    }

    #[tokio::test]
    async fn category_is_unsupported() {
        let server = MockServer::start_async().await;
        let adapter = adapter_for(&server);
        let err = adapter
            .set_category(&TorrentId::new("abc"), Some("films"))
            .await
            .expect_err("no category model");
        assert!(matches!(err, AdapterError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_unavailable_after_retries() {
        let server = MockServer::start_async().await;
        let rpc = server.mock(|when, then| {
            when.method(POST).path(RPC_PATH);
            then.status(401);
        });

        let adapter = adapter_for(&server);
        let err = adapter
            .recheck(&TorrentId::new("abc"))
            .await
            .expect_err("bad credentials");
        assert!(err.is_unavailable());
        rpc.assert_hits(2);
    }

    #[test]
    fn speed_limits_round_up_to_kilobytes() {
        assert_eq!(speed_limit(None), (false, 0));
        assert_eq!(speed_limit(Some(1)), (true, 1));
        assert_eq!(speed_limit(Some(1_500)), (true, 2));
        assert_eq!(speed_limit(Some(2_000)), (true, 2));
    }
}
