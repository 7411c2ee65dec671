//! Session-aware RPC client for a single daemon.

use std::error::Error as StdError;
use std::io;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::HOST;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ClientConfig, Endpoint};
use crate::error::{RpcError, TransientKind};
use crate::protocol::{
    AddArguments, GetArguments, IdsArguments, METHOD_SESSION_STATS, METHOD_TORRENT_ADD,
    METHOD_TORRENT_GET, METHOD_TORRENT_REMOVE, METHOD_TORRENT_VERIFY, REQUESTED_WITH_HEADER,
    RESULT_SUCCESS, RemoveArguments, RpcRequest, RpcResponse, SESSION_ID_HEADER, SessionStats,
    TIME_HEADER, TorrentList,
};
use crate::retry::{AttemptTracker, CallSignature};
use crate::snapshot::{JobSnapshot, SNAPSHOT_FIELDS};

/// Build the HTTP client used for one daemon.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, RpcError> {
    let mut builder = reqwest::Client::builder().no_proxy();

    if !config.request_timeout().is_zero() {
        builder = builder
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout());
    }

    if config.pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
    }

    Ok(builder.build()?)
}

/// Classify a reqwest error as one of the retryable network failures.
///
/// Anything not recognised is left to the caller as a hard transport error.
pub fn classify_transient(error: &reqwest::Error) -> Option<TransientKind> {
    if let Some(kind) = io_error_kind(error) {
        match kind {
            io::ErrorKind::ConnectionRefused => return Some(TransientKind::ConnectionRefused),
            io::ErrorKind::TimedOut => return Some(TransientKind::TimedOut),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => return Some(TransientKind::ConnectionReset),
            _ => {}
        }
    }

    if error.is_timeout() {
        return Some(TransientKind::TimedOut);
    }

    None
}

fn io_error_kind(error: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(current) = source {
        if let Some(io_error) = current.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
        source = current.source();
    }
    None
}

/// JSON-RPC client bound to one daemon.
///
/// Holds the daemon's session token and the per-call retry counters; both are
/// only touched from here.
pub struct TransmissionClient {
    endpoint: Endpoint,
    url: String,
    config: ClientConfig,
    http: reqwest::Client,
    session_id: RwLock<String>,
    attempts: AttemptTracker,
}

impl TransmissionClient {
    pub fn new(endpoint: Endpoint, config: ClientConfig) -> Result<Self, RpcError> {
        let http = build_http_client(&config)?;
        Ok(Self::with_http_client(endpoint, config, http))
    }

    pub fn with_http_client(endpoint: Endpoint, config: ClientConfig, http: reqwest::Client) -> Self {
        let url = config.rpc_url(&endpoint);
        Self {
            endpoint,
            url,
            config,
            http,
            session_id: RwLock::new(String::new()),
            attempts: AttemptTracker::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn session_id(&self) -> String {
        self.session_id.read().clone()
    }

    /// Outstanding failure count for a call.
    pub fn attempts_for(&self, method: &str, arguments: &Value) -> u32 {
        self.attempts
            .attempts(&CallSignature::new(self.endpoint.authority(), method, arguments))
    }

    /// Issue `method` and return the response `arguments` object.
    ///
    /// Session renewal (409) is handled transparently. Transient network
    /// failures are retried with a fixed delay until the per-call budget runs
    /// out, except a refused `session-stats`, which fails at once.
    pub async fn call(&self, method: &str, arguments: Value) -> Result<Value, RpcError> {
        let authority = self.endpoint.authority();
        let signature = CallSignature::new(authority.as_str(), method, &arguments);
        let mut handshakes = 0u32;

        loop {
            debug!(endpoint = %authority, method, "Sending RPC request");

            let response = match self.send(method, &arguments).await {
                Ok(response) => response,
                Err(error) => {
                    let Some(kind) = classify_transient(&error) else {
                        warn!(endpoint = %authority, method, error = %error, "RPC request failed");
                        return Err(RpcError::Transport { source: error });
                    };

                    if kind == TransientKind::ConnectionRefused && method == METHOD_SESSION_STATS {
                        debug!(endpoint = %authority, "Load query refused, skipping retries");
                        return Err(RpcError::transient(
                            authority,
                            method,
                            kind,
                            error.to_string(),
                        ));
                    }

                    let attempts = self.attempts.record_failure(&signature);
                    if self.config.retry.is_exhausted(attempts) {
                        self.attempts.reset(&signature);
                        warn!(endpoint = %authority, method, attempts, "Max attempts reached");
                        return Err(RpcError::MaxAttemptsExceeded {
                            endpoint: authority,
                            method: method.to_string(),
                            attempts,
                            last: kind,
                        });
                    }

                    warn!(
                        endpoint = %authority,
                        method,
                        attempt = attempts,
                        max = self.config.retry.max_attempts,
                        error = %error,
                        "Retrying after {kind}"
                    );
                    tokio::time::sleep(self.config.retry.retry_delay()).await;
                    continue;
                }
            };

            match response.status() {
                StatusCode::CONFLICT => {
                    handshakes += 1;
                    if handshakes > self.config.max_session_handshakes {
                        return Err(RpcError::SessionNegotiation {
                            endpoint: authority,
                            attempts: handshakes,
                        });
                    }

                    match response
                        .headers()
                        .get(SESSION_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                    {
                        Some(token) => {
                            debug!(endpoint = %authority, "Session token renewed");
                            *self.session_id.write() = token.to_string();
                        }
                        None => warn!(endpoint = %authority, "409 without a session token"),
                    }
                    continue;
                }
                StatusCode::UNAUTHORIZED => {
                    warn!(endpoint = %authority, method, "Unauthorized");
                    return Err(RpcError::Unauthorized {
                        endpoint: authority,
                    });
                }
                status if !status.is_success() => {
                    return Err(RpcError::HttpStatus {
                        status,
                        endpoint: authority,
                        method: method.to_string(),
                    });
                }
                _ => {}
            }

            self.attempts.reset(&signature);

            let body = response.bytes().await?;
            let parsed: RpcResponse = serde_json::from_slice(&body)?;
            if !parsed.result.is_empty() && parsed.result != RESULT_SUCCESS {
                return Err(RpcError::rejected(authority, method, parsed.result));
            }

            return Ok(parsed.arguments.unwrap_or(Value::Null));
        }
    }

    async fn send(&self, method: &str, arguments: &Value) -> reqwest::Result<reqwest::Response> {
        let session_id = self.session_id();
        let mut request = self
            .http
            .post(&self.url)
            .header(TIME_HEADER, Utc::now().to_rfc2822())
            .header(HOST, self.endpoint.authority())
            .header(REQUESTED_WITH_HEADER, self.config.client_id.as_str())
            .header(SESSION_ID_HEADER, session_id)
            .json(&RpcRequest { method, arguments });

        if let Some(username) = &self.endpoint.username {
            request = request.basic_auth(username, self.endpoint.password.as_ref());
        }

        request.send().await
    }

    async fn call_with<A: Serialize>(&self, method: &str, arguments: &A) -> Result<Value, RpcError> {
        self.call(method, serde_json::to_value(arguments)?).await
    }

    /// Daemon-wide statistics; `torrent_count` is the member's load.
    pub async fn session_stats(&self) -> Result<SessionStats, RpcError> {
        let arguments = self
            .call(METHOD_SESSION_STATS, Value::Object(Default::default()))
            .await?;
        Ok(serde_json::from_value(arguments)?)
    }

    pub async fn torrent_add(&self, filename: &str, download_dir: &str) -> Result<Value, RpcError> {
        self.call_with(
            METHOD_TORRENT_ADD,
            &AddArguments {
                filename,
                download_dir,
            },
        )
        .await
    }

    /// Fetch one job. `None` means the daemon has no record of it.
    pub async fn torrent_get(&self, hash: &str) -> Result<Option<JobSnapshot>, RpcError> {
        let arguments = self
            .call_with(
                METHOD_TORRENT_GET,
                &GetArguments {
                    fields: SNAPSHOT_FIELDS,
                    ids: &[hash],
                },
            )
            .await?;

        if arguments.is_null() {
            return Ok(None);
        }

        let list: TorrentList = serde_json::from_value(arguments)?;
        Ok(list
            .torrents
            .into_iter()
            .next()
            .map(|raw| JobSnapshot::from_raw(raw, self.endpoint.host.as_str())))
    }

    pub async fn torrent_remove(&self, hash: &str, delete_local_data: bool) -> Result<(), RpcError> {
        self.call_with(
            METHOD_TORRENT_REMOVE,
            &RemoveArguments {
                ids: &[hash],
                delete_local_data,
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn torrent_verify(&self, hash: &str) -> Result<(), RpcError> {
        self.call_with(METHOD_TORRENT_VERIFY, &IdsArguments { ids: &[hash] })
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for TransmissionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionClient")
            .field("endpoint", &self.endpoint)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
