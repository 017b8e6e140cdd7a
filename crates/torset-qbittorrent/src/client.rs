//! Web API v2 session and the `DownloaderAdapter` implementation.
//!
//! # Design
//! - The session cookie lives in reqwest's cookie store; a `403` triggers one
//!   re-login before the call is reported as unavailable.
//! - qBittorrent does not return the hash of an added torrent, so every add
//!   carries a random marker tag that is looked up and then removed.
//! - Adds are sent once; every other call goes through the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use reqwest::header::REFERER;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use torset_core::{
    AddTorrent, AdapterError, AdapterResult, DownloaderAdapter, LabelSet, RateLimit,
    RemoveTorrent, RetryPolicy, TorrentId, TorrentSnapshot, retry_transient,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::wire::QbTorrentEntry;

pub(crate) const BACKEND: &str = "qbittorrent";

const MARKER_TAG_LEN: usize = 10;
const MARKER_LOOKUP_ATTEMPTS: u32 = 5;
const MARKER_LOOKUP_DELAY: Duration = Duration::from_millis(200);
const MARKER_NOT_FOUND: &str = "added torrent not found by marker tag";

const LOGIN_PATH: &str = "api/v2/auth/login";
const INFO_PATH: &str = "api/v2/torrents/info";
const ADD_PATH: &str = "api/v2/torrents/add";
const ADD_TAGS_PATH: &str = "api/v2/torrents/addTags";
const REMOVE_TAGS_PATH: &str = "api/v2/torrents/removeTags";
const DELETE_TAGS_PATH: &str = "api/v2/torrents/deleteTags";
const SET_CATEGORY_PATH: &str = "api/v2/torrents/setCategory";
const UPLOAD_LIMIT_PATH: &str = "api/v2/torrents/setUploadLimit";
const DOWNLOAD_LIMIT_PATH: &str = "api/v2/torrents/setDownloadLimit";
const DELETE_PATH: &str = "api/v2/torrents/delete";
const RECHECK_PATH: &str = "api/v2/torrents/recheck";
const START_PATH: &str = "api/v2/torrents/start";
const LEGACY_RESUME_PATH: &str = "api/v2/torrents/resume";

/// Connection settings for one qBittorrent instance.
#[derive(Debug, Clone)]
pub struct QbittorrentConfig {
    /// Base URL of the web UI (e.g. `http://localhost:8080`).
    pub base_url: Url,
    /// Login; when absent the adapter assumes auth bypass for this client.
    pub username: Option<String>,
    /// Password paired with `username`.
    pub password: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Retry budget for transient failures.
    pub retry: RetryPolicy,
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// Adapter over the qBittorrent Web API v2.
pub struct QbittorrentAdapter {
    http: Client,
    base_url: Url,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    authenticated: AtomicBool,
}

impl QbittorrentAdapter {
    /// Build an adapter; no network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BackendUnavailable`] when the HTTP client
    /// cannot be constructed.
    pub fn new(config: QbittorrentConfig) -> AdapterResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .build()
            .map_err(|err| AdapterError::unavailable(BACKEND, "client.build", err))?;
        let credentials = config.username.map(|username| Credentials {
            username,
            password: config.password.unwrap_or_default(),
        });
        Ok(Self {
            http,
            base_url: with_trailing_slash(config.base_url),
            credentials,
            retry: config.retry,
            authenticated: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> AdapterResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| AdapterError::protocol(BACKEND, "url.join", err.to_string()))
    }

    async fn login(&self) -> AdapterResult<()> {
        let Some(credentials) = &self.credentials else {
            return Ok(());
        };
        let url = self.endpoint(LOGIN_PATH)?;
        let response = self
            .http
            .post(url)
            .header(REFERER, self.base_url.as_str())
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| transport_error("auth.login", err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| transport_error("auth.login", err))?;
        if status.is_success() && body.trim() == "Ok." {
            self.authenticated.store(true, Ordering::Release);
            debug!(backend = BACKEND, "session established");
            Ok(())
        } else {
            self.authenticated.store(false, Ordering::Release);
            Err(AdapterError::unavailable(
                BACKEND,
                "auth.login",
                format!("login rejected with status {status}"),
            ))
        }
    }

    async fn send<F>(&self, operation: &'static str, build: &F) -> AdapterResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        build(&self.http)
            .header(REFERER, self.base_url.as_str())
            .send()
            .await
            .map_err(|err| transport_error(operation, err))
    }

    async fn execute<F>(&self, operation: &'static str, build: &F) -> AdapterResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        if self.credentials.is_some() && !self.authenticated.load(Ordering::Acquire) {
            self.login().await?;
        }
        let mut response = self.send(operation, build).await?;
        if response.status() == StatusCode::FORBIDDEN && self.credentials.is_some() {
            debug!(backend = BACKEND, operation, "session expired; logging in again");
            self.authenticated.store(false, Ordering::Release);
            self.login().await?;
            response = self.send(operation, build).await?;
        }
        let status = response.status();
        if status.is_server_error() || status == StatusCode::FORBIDDEN {
            return Err(AdapterError::unavailable(
                BACKEND,
                operation,
                format!("http status {status}"),
            ));
        }
        Ok(response)
    }

    async fn call<F>(
        &self,
        policy: RetryPolicy,
        operation: &'static str,
        build: F,
    ) -> AdapterResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        let build = &build;
        retry_transient(policy, operation, move || self.execute(operation, build)).await
    }

    async fn call_json<T, F>(&self, operation: &'static str, build: F) -> AdapterResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        let response = self.call(self.retry, operation, build).await?;
        ensure_success(operation, &response)?;
        response
            .json::<T>()
            .await
            .map_err(|err| transport_error(operation, err))
    }

    async fn post_hashes(
        &self,
        operation: &'static str,
        path: &str,
        id: &TorrentId,
        extra: &[(&'static str, String)],
    ) -> AdapterResult<()> {
        let url = self.endpoint(path)?;
        let mut form = vec![("hashes", id.to_string())];
        form.extend_from_slice(extra);
        let response = self
            .call(self.retry, operation, |client| {
                client.post(url.clone()).form(&form)
            })
            .await?;
        ensure_success(operation, &response)
    }

    async fn info(
        &self,
        operation: &'static str,
        query: &[(&'static str, &str)],
    ) -> AdapterResult<Vec<QbTorrentEntry>> {
        let url = self.endpoint(INFO_PATH)?;
        self.call_json(operation, |client| client.get(url.clone()).query(query))
            .await
    }

    async fn lookup_marker(&self, marker: &str) -> AdapterResult<TorrentId> {
        for attempt in 0..MARKER_LOOKUP_ATTEMPTS {
            let entries = self.info("torrents.lookup", &[("tag", marker)]).await?;
            if let Some(entry) = entries.into_iter().next() {
                return entry
                    .into_snapshot("torrents.lookup")
                    .map(|snapshot| snapshot.id);
            }
            debug!(backend = BACKEND, attempt, "added torrent not visible yet");
            sleep(MARKER_LOOKUP_DELAY).await;
        }
        Err(AdapterError::protocol(
            BACKEND,
            "torrents.lookup",
            format!("{MARKER_NOT_FOUND} {marker}"),
        ))
    }

    async fn drop_marker(&self, id: &TorrentId, marker: &str) {
        if let Err(err) = self
            .post_hashes(
                "torrents.remove_marker",
                REMOVE_TAGS_PATH,
                id,
                &[("tags", marker.to_string())],
            )
            .await
        {
            warn!(backend = BACKEND, torrent_id = %id, error = %err, "failed to remove marker tag");
            return;
        }
        let url = match self.endpoint(DELETE_TAGS_PATH) {
            Ok(url) => url,
            Err(err) => {
                warn!(backend = BACKEND, error = %err, "failed to delete marker tag");
                return;
            }
        };
        let result = self
            .call(RetryPolicy::none(), "tags.delete", |client| {
                client.post(url.clone()).form(&[("tags", marker)])
            })
            .await
            .and_then(|response| ensure_success("tags.delete", &response));
        if let Err(err) = result {
            warn!(backend = BACKEND, error = %err, "failed to delete marker tag");
        }
    }
}

#[async_trait]
impl DownloaderAdapter for QbittorrentAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn list_completed(&self) -> AdapterResult<Vec<TorrentSnapshot>> {
        let entries = self
            .info("torrents.list", &[("filter", "completed")])
            .await?;
        entries
            .into_iter()
            .map(|entry| entry.into_snapshot("torrents.list"))
            .filter(|snapshot| snapshot.as_ref().map_or(true, TorrentSnapshot::is_completed))
            .collect()
    }

    async fn add_torrent(&self, request: AddTorrent) -> AdapterResult<TorrentId> {
        let marker = correlation_tag();
        let mut tags = request.tags;
        tags.push(marker.clone());
        let tags = tags.join(",");
        let paused = request.start_paused.to_string();
        let url = self.endpoint(ADD_PATH)?;
        let metainfo = request.metainfo;
        let download_dir = request.download_dir;

        let response = self
            .call(RetryPolicy::none(), "torrents.add", |client| {
                let part = Part::bytes(metainfo.clone()).file_name("upload.torrent");
                let form = Form::new()
                    .part("torrents", part)
                    .text("savepath", download_dir.clone())
                    .text("paused", paused.clone())
                    .text("stopped", paused.clone())
                    .text("tags", tags.clone());
                client.post(url.clone()).multipart(form)
            })
            .await?;
        if response.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Err(AdapterError::AddRejected {
                backend: BACKEND,
                reason: "torrent file is not valid".into(),
            });
        }
        ensure_success("torrents.add", &response)?;
        let body = response
            .text()
            .await
            .map_err(|err| transport_error("torrents.add", err))?;
        if body.trim() == "Fails." {
            return Err(AdapterError::AddRejected {
                backend: BACKEND,
                reason: "client refused the torrent".into(),
            });
        }

        let id = match self.lookup_marker(&marker).await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    backend = BACKEND,
                    marker = %marker,
                    download_dir = %download_dir,
                    error = %err,
                    "torrent added but not located; it still carries the marker tag"
                );
                return Err(err);
            }
        };
        self.drop_marker(&id, &marker).await;
        info!(backend = BACKEND, torrent_id = %id, download_dir = %download_dir, "torrent added");
        Ok(id)
    }

    async fn set_labels(&self, id: &TorrentId, labels: &LabelSet) -> AdapterResult<()> {
        self.post_hashes(
            "torrents.clear_tags",
            REMOVE_TAGS_PATH,
            id,
            &[("tags", String::new())],
        )
        .await?;
        if labels.is_empty() {
            return Ok(());
        }
        self.post_hashes(
            "torrents.add_tags",
            ADD_TAGS_PATH,
            id,
            &[("tags", labels.joined())],
        )
        .await
    }

    async fn set_category(&self, id: &TorrentId, category: Option<&str>) -> AdapterResult<()> {
        self.post_hashes(
            "torrents.set_category",
            SET_CATEGORY_PATH,
            id,
            &[("category", category.unwrap_or_default().to_string())],
        )
        .await
    }

    async fn set_rate_limits(&self, id: &TorrentId, limits: RateLimit) -> AdapterResult<()> {
        self.post_hashes(
            "torrents.upload_limit",
            UPLOAD_LIMIT_PATH,
            id,
            &[("limit", limits.upload_bps.unwrap_or(0).to_string())],
        )
        .await?;
        self.post_hashes(
            "torrents.download_limit",
            DOWNLOAD_LIMIT_PATH,
            id,
            &[("limit", limits.download_bps.unwrap_or(0).to_string())],
        )
        .await
    }

    async fn remove_torrent(&self, id: &TorrentId, options: RemoveTorrent) -> AdapterResult<()> {
        self.post_hashes(
            "torrents.delete",
            DELETE_PATH,
            id,
            &[("deleteFiles", options.with_data.to_string())],
        )
        .await
    }

    async fn recheck(&self, id: &TorrentId) -> AdapterResult<()> {
        self.post_hashes("torrents.recheck", RECHECK_PATH, id, &[])
            .await
    }

    async fn resume(&self, id: &TorrentId) -> AdapterResult<()> {
        let url = self.endpoint(START_PATH)?;
        let form = [("hashes", id.to_string())];
        let response = self
            .call(self.retry, "torrents.start", |client| {
                client.post(url.clone()).form(&form)
            })
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Clients older than v5 only know the legacy endpoint.
            return self
                .post_hashes("torrents.resume", LEGACY_RESUME_PATH, id, &[])
                .await;
        }
        ensure_success("torrents.start", &response)
    }

    async fn get_state(&self, id: &TorrentId) -> AdapterResult<TorrentSnapshot> {
        let entries = self
            .info("torrents.get", &[("hashes", id.as_str())])
            .await?;
        entries
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::NotFound {
                backend: BACKEND,
                torrent_id: id.clone(),
            })?
            .into_snapshot("torrents.get")
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn correlation_tag() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(MARKER_TAG_LEN)
        .map(char::from)
        .collect()
}

fn ensure_success(operation: &'static str, response: &Response) -> AdapterResult<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(AdapterError::protocol(
            BACKEND,
            operation,
            format!("http status {status}"),
        ))
    }
}

fn transport_error(operation: &'static str, err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout {
            backend: BACKEND,
            operation,
        }
    } else if err.is_decode() {
        AdapterError::protocol(BACKEND, operation, err.to_string())
    } else {
        AdapterError::unavailable(BACKEND, operation, err)
    }
}
