//! JSON-RPC transport with the `X-Transmission-Session-Id` handshake.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use torset_core::{AdapterError, AdapterResult, RetryPolicy, retry_transient};
use tracing::debug;
use url::Url;

pub(crate) const BACKEND: &str = "transmission";
const SESSION_HEADER: &str = "x-transmission-session-id";
const SUCCESS: &str = "success";

/// Connection settings for one Transmission daemon.
#[derive(Debug, Clone)]
pub struct TransmissionConfig {
    /// Full RPC URL (e.g. `http://localhost:9091/transmission/rpc`).
    pub rpc_url: Url,
    /// Basic-auth login, when the daemon requires one.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Retry budget for transient failures.
    pub retry: RetryPolicy,
}

/// Response envelope shared by every RPC method.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcEnvelope<T> {
    pub result: String,
    pub arguments: Option<T>,
}

impl<T> RpcEnvelope<T> {
    pub(crate) fn is_success(&self) -> bool {
        self.result == SUCCESS
    }
}

pub(crate) struct RpcClient {
    http: Client,
    rpc_url: Url,
    credentials: Option<(String, String)>,
    session_id: Mutex<Option<HeaderValue>>,
    pub(crate) retry: RetryPolicy,
}

impl RpcClient {
    pub(crate) fn new(config: TransmissionConfig) -> AdapterResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AdapterError::unavailable(BACKEND, "client.build", err))?;
        Ok(Self {
            http,
            rpc_url: config.rpc_url,
            credentials: config
                .username
                .map(|username| (username, config.password.unwrap_or_default())),
            session_id: Mutex::new(None),
            retry: config.retry,
        })
    }

    fn current_session(&self) -> Option<HeaderValue> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, value: HeaderValue) {
        *self
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    async fn send(&self, operation: &'static str, body: &Value) -> AdapterResult<Response> {
        let mut request = self.http.post(self.rpc_url.clone()).json(body);
        if let Some(session) = self.current_session() {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }
        request
            .send()
            .await
            .map_err(|err| transport_error(operation, err))
    }

    async fn exchange<T>(
        &self,
        operation: &'static str,
        body: &Value,
    ) -> AdapterResult<RpcEnvelope<T>>
    where
        T: DeserializeOwned,
    {
        let mut response = self.send(operation, body).await?;
        if response.status() == StatusCode::CONFLICT {
            let session = response
                .headers()
                .get(SESSION_HEADER)
                .cloned()
                .ok_or_else(|| {
                    AdapterError::protocol(BACKEND, operation, "409 without session id")
                })?;
            debug!(backend = BACKEND, operation, "refreshing rpc session id");
            self.store_session(session);
            response = self.send(operation, body).await?;
        }

        let status = response.status();
        if status.is_server_error()
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::CONFLICT
        {
            return Err(AdapterError::unavailable(
                BACKEND,
                operation,
                format!("http status {status}"),
            ));
        }
        if !status.is_success() {
            return Err(AdapterError::protocol(
                BACKEND,
                operation,
                format!("http status {status}"),
            ));
        }
        response
            .json::<RpcEnvelope<T>>()
            .await
            .map_err(|err| transport_error(operation, err))
    }

    /// Issue `method` and return the raw envelope, whatever its `result`.
    pub(crate) async fn call<T>(
        &self,
        policy: RetryPolicy,
        operation: &'static str,
        method: &'static str,
        arguments: Value,
    ) -> AdapterResult<RpcEnvelope<T>>
    where
        T: DeserializeOwned,
    {
        let body = json!({ "method": method, "arguments": arguments });
        let body = &body;
        retry_transient(policy, operation, move || self.exchange(operation, body)).await
    }

    /// Issue `method` and require a `success` result.
    pub(crate) async fn invoke<T>(
        &self,
        operation: &'static str,
        method: &'static str,
        arguments: Value,
    ) -> AdapterResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let envelope = self.call(self.retry, operation, method, arguments).await?;
        if envelope.is_success() {
            Ok(envelope.arguments)
        } else {
            Err(AdapterError::protocol(BACKEND, operation, envelope.result))
        }
    }
}

pub(crate) fn transport_error(operation: &'static str, err: reqwest::Error) -> AdapterError {
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
