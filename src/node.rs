//! A session to one audio node: event stream, REST client, reconnection.
//!
//! Each [`Node`] owns at most one socket task at a time. The task drives the
//! connection state machine (including backoff and resume) and pushes parsed
//! frames into the cluster's internal event channel; REST calls are
//! independent in-flight requests on a shared HTTP client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::protocol::{self, NodeFrame, UpdatePlayer};
use crate::routing::NodeSnapshot;
use crate::types::{LavalinkInfo, LoadResult, NodeStats, PluginMeta, Track};
use crate::{Error, Result};

/// Cached node info expires after this long.
const INFO_CACHE_TTL: Duration = Duration::from_secs(300);

/// Reconnect delays never exceed this.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

const REST_TIMEOUT: Duration = Duration::from_secs(5);
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Event-stream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Internal events from a node, consumed by the cluster router.
#[derive(Debug)]
pub(crate) enum NodeEvent {
    Connect {
        node_id: String,
    },
    Ready {
        node_id: String,
        session_id: String,
        resumed: bool,
    },
    Disconnect {
        node_id: String,
        code: u16,
        reason: String,
    },
    Error {
        node_id: String,
        message: String,
    },
    Stats {
        node_id: String,
        stats: NodeStats,
    },
    InfoUpdate {
        node_id: String,
        info: LavalinkInfo,
    },
    PluginLoaded {
        node_id: String,
        plugin: PluginMeta,
    },
    PlayerEvent {
        node_id: String,
        guild_id: String,
        event: protocol::TrackEvent,
    },
    PlayerUpdate {
        node_id: String,
        guild_id: String,
        state: crate::types::PlayerUpdateState,
    },
    Raw {
        node_id: String,
        payload: Value,
    },
}

/// Options for a plugin passthrough request.
#[derive(Debug, Clone, Default)]
pub struct PluginRequestOptions {
    /// Use POST instead of GET.
    pub post: bool,
    /// JSON body for POST requests.
    pub body: Option<Value>,
}

#[derive(Default)]
struct NodeState {
    connection: ConnectionState,
    session_id: Option<String>,
    reconnect_attempts: u32,
    client_id: Option<String>,
    stats: Option<NodeStats>,
    info: Option<LavalinkInfo>,
    info_fetched_at: Option<Instant>,
    plugins: HashMap<String, PluginMeta>,
    shutdown: Option<watch::Sender<bool>>,
    socket_task: Option<JoinHandle<()>>,
}

struct NodeInner {
    config: NodeConfig,
    user_agent: String,
    http: reqwest::Client,
    state: Mutex<NodeState>,
    events: mpsc::UnboundedSender<NodeEvent>,
    debug_frames: bool,
}

/// Handle to one audio node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.config.id)
            .field("host", &self.inner.config.host)
            .finish()
    }
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        user_agent: String,
        http: reqwest::Client,
        events: mpsc::UnboundedSender<NodeEvent>,
        debug_frames: bool,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                config,
                user_agent,
                http,
                state: Mutex::new(NodeState::default()),
                events,
                debug_frames,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().connection
    }

    /// Session id issued by the node, once ready.
    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().unwrap().session_id.clone()
    }

    /// Latest statistics pushed or fetched from the node.
    pub fn stats(&self) -> Option<NodeStats> {
        self.inner.state.lock().unwrap().stats.clone()
    }

    /// Connected with a session id; REST player commands are addressable.
    pub fn is_ready(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.connection == ConnectionState::Connected && state.session_id.is_some()
    }

    /// Plugins discovered on the node, by name.
    pub fn plugins(&self) -> Vec<PluginMeta> {
        self.inner
            .state
            .lock()
            .unwrap()
            .plugins
            .values()
            .cloned()
            .collect()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.inner.state.lock().unwrap().plugins.contains_key(name)
    }

    pub(crate) fn snapshot(&self) -> NodeSnapshot {
        let state = self.inner.state.lock().unwrap();
        NodeSnapshot {
            id: self.inner.config.id.clone(),
            connected: state.connection == ConnectionState::Connected,
            ready: state.connection == ConnectionState::Connected && state.session_id.is_some(),
            region: self.inner.config.region.clone(),
            priority: self.inner.config.priority,
            stats: state.stats.clone(),
        }
    }

    /// Open the event stream. Returns immediately; subscribe to
    /// `NodeReady` to learn when the session is addressable.
    pub fn connect(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        let receiver = {
            let mut state = self.inner.state.lock().unwrap();
            match state.connection {
                ConnectionState::Disconnected => {}
                _ => {
                    debug!(node = %self.inner.config.id, "connect() ignored, socket already up");
                    return;
                }
            }
            state.client_id = Some(client_id);
            state.connection = ConnectionState::Connecting;
            state.reconnect_attempts = 0;
            let (tx, rx) = watch::channel(false);
            state.shutdown = Some(tx);
            rx
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(run_socket(inner, receiver));
        self.inner.state.lock().unwrap().socket_task = Some(task);
    }

    /// Intentionally close the event stream with code 1000.
    ///
    /// Cancels any pending reconnect. The session id is retained only when
    /// a resume key is configured.
    pub fn disconnect(&self) {
        let shutdown = self.inner.state.lock().unwrap().shutdown.take();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
    }

    // ========================================================================
    // REST operations
    // ========================================================================

    /// `PATCH /v4/sessions/{sid}/players/{guild}`.
    pub async fn update_player(
        &self,
        guild_id: &str,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<()> {
        let session_id = self.ensure_ready()?;
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}");
        let query: &[(&str, &str)] = if no_replace {
            &[("noReplace", "true")]
        } else {
            &[]
        };
        let body = update.to_body()?;
        self.inner
            .request(Method::PATCH, &path, query, Some(body), REST_TIMEOUT)
            .await?;
        Ok(())
    }

    /// `DELETE /v4/sessions/{sid}/players/{guild}`. A missing player is
    /// treated as success.
    pub async fn destroy_player(&self, guild_id: &str) -> Result<()> {
        let session_id = self.ensure_ready()?;
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}");
        match self
            .inner
            .request(Method::DELETE, &path, &[], None, REST_TIMEOUT)
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Rest { status: 404, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Resolve an identifier or search query into tracks.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        self.ensure_ready()?;
        let response = self
            .inner
            .request(
                Method::GET,
                "/v4/loadtracks",
                &[("identifier", identifier)],
                None,
                LOAD_TIMEOUT,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Decode one encoded track blob into its metadata.
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        self.ensure_ready()?;
        let response = self
            .inner
            .request(
                Method::GET,
                "/v4/decodetrack",
                &[("encodedTrack", encoded)],
                None,
                REST_TIMEOUT,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Decode a batch of encoded track blobs.
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        self.ensure_ready()?;
        let response = self
            .inner
            .request(
                Method::POST,
                "/v4/decodetracks",
                &[],
                Some(serde_json::to_value(encoded)?),
                LOAD_TIMEOUT,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Node build and capability report, cached for five minutes.
    pub async fn get_info(&self, force_refresh: bool) -> Result<LavalinkInfo> {
        self.ensure_ready()?;
        if !force_refresh {
            if let Some(info) = self.cached_info() {
                return Ok(info);
            }
        }
        self.inner.refresh_info().await
    }

    /// Lavalink version string from `GET /version`.
    pub async fn version(&self) -> Result<String> {
        self.ensure_ready()?;
        let response = self
            .inner
            .request(Method::GET, "/version", &[], None, REST_TIMEOUT)
            .await?;
        Ok(response.text().await?)
    }

    /// Fetch statistics over REST, updating the cached copy.
    pub async fn fetch_stats(&self) -> Result<NodeStats> {
        self.ensure_ready()?;
        let response = self
            .inner
            .request(Method::GET, "/v4/stats", &[], None, REST_TIMEOUT)
            .await?;
        let stats: NodeStats = response.json().await?;
        self.inner.state.lock().unwrap().stats = Some(stats.clone());
        Ok(stats)
    }

    /// Call an endpoint exposed by an installed plugin.
    ///
    /// Verifies the plugin against the cached info (refreshing once when
    /// the cache is empty) and returns the parsed JSON response, or `Null`
    /// for non-JSON responses.
    pub async fn plugin_request(
        &self,
        plugin: &str,
        endpoint: &str,
        options: &PluginRequestOptions,
    ) -> Result<Value> {
        self.ensure_ready()?;
        if self.inner.state.lock().unwrap().plugins.is_empty() {
            self.inner.refresh_info().await?;
        }
        if !self.has_plugin(plugin) {
            return Err(Error::PluginNotAvailable(plugin.to_string()));
        }

        let path = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{endpoint}")
        };
        let method = if options.post { Method::POST } else { Method::GET };
        let response = self
            .inner
            .request(method, &path, &[], options.body.clone(), LOAD_TIMEOUT)
            .await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if is_json {
            Ok(response.json().await?)
        } else {
            Ok(Value::Null)
        }
    }

    #[cfg(test)]
    pub(crate) fn force_ready_for_tests(&self, session_id: &str) {
        let mut state = self.inner.state.lock().unwrap();
        state.connection = ConnectionState::Connected;
        state.session_id = Some(session_id.to_string());
    }

    fn cached_info(&self) -> Option<LavalinkInfo> {
        let state = self.inner.state.lock().unwrap();
        match (&state.info, state.info_fetched_at) {
            (Some(info), Some(at)) if at.elapsed() < INFO_CACHE_TTL => Some(info.clone()),
            _ => None,
        }
    }

    /// Readiness gate for REST: connected with a session id, or
    /// `NodeNotReady` before any network I/O.
    fn ensure_ready(&self) -> Result<String> {
        let state = self.inner.state.lock().unwrap();
        if state.connection == ConnectionState::Connected {
            if let Some(session_id) = &state.session_id {
                return Ok(session_id.clone());
            }
        }
        Err(Error::NodeNotReady(self.inner.config.id.clone()))
    }
}

impl NodeInner {
    fn ws_url(&self) -> String {
        let scheme = if self.config.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/v4/websocket",
            self.config.host, self.config.port
        )
    }

    fn http_url(&self, path: &str) -> String {
        let scheme = if self.config.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}{path}", self.config.host, self.config.port)
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(node = %self.config.id, error = %message, "node error");
        self.emit(NodeEvent::Error {
            node_id: self.config.id.clone(),
            message,
        });
    }

    /// Fetch `/v4/info`, rebuild the plugin index, and announce the result.
    ///
    /// Not gated on readiness: plugin discovery runs on socket open, which
    /// can race the `ready` frame.
    async fn refresh_info(&self) -> Result<LavalinkInfo> {
        let response = self
            .request(Method::GET, "/v4/info", &[], None, REST_TIMEOUT)
            .await?;
        let info: LavalinkInfo = response.json().await?;

        {
            let mut state = self.state.lock().unwrap();
            state.plugins = info
                .plugins
                .iter()
                .map(|plugin| (plugin.name.clone(), plugin.clone()))
                .collect();
            state.info = Some(info.clone());
            state.info_fetched_at = Some(Instant::now());
        }

        self.emit(NodeEvent::InfoUpdate {
            node_id: self.config.id.clone(),
            info: info.clone(),
        });
        for plugin in &info.plugins {
            debug!(node = %self.config.id, plugin = %plugin.name, version = %plugin.version,
                "plugin discovered");
            self.emit(NodeEvent::PluginLoaded {
                node_id: self.config.id.clone(),
                plugin: plugin.clone(),
            });
        }
        Ok(info)
    }

    /// One authorized REST request with a per-call timeout.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let url = self.http_url(path);
        let mut builder = self
            .http
            .request(method, &url)
            .timeout(timeout)
            .header(reqwest::header::AUTHORIZATION, self.config.password.as_str());
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Best effort: the node reports failures as {"message": ...}.
        let message = match response.text().await {
            Ok(text) => serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text),
            Err(_) => String::new(),
        };
        Err(Error::Rest {
            status: status.as_u16(),
            message,
        })
    }

    fn build_ws_request(&self) -> Result<Request> {
        let mut request = self
            .ws_url()
            .into_client_request()
            .map_err(Box::new)?;
        let state = self.state.lock().unwrap();
        let client_id = state.client_id.clone().unwrap_or_default();
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.config.password)?);
        headers.insert("User-Id", header_value(&client_id)?);
        headers.insert("Client-Name", header_value(&self.user_agent)?);
        if self.config.resume_key.is_some() {
            if let Some(session_id) = &state.session_id {
                headers.insert("Session-Id", header_value(session_id)?);
            }
        }
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| Error::WebSocket(Box::new(tungstenite::Error::HttpFormat(err.into()))))
}

/// Reconnect delay for the given attempt (1-based): exponential with up to
/// one second of jitter, clamped at [`MAX_BACKOFF`].
fn reconnect_backoff(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let exponential = base.saturating_mul(1u32 << shift);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
    (exponential + jitter).min(MAX_BACKOFF)
}

/// Outcome of one socket session, deciding the next state transition.
enum SessionEnd {
    /// `disconnect()` was called or the node closed with 1000.
    Intentional { code: u16, reason: String },
    /// Abnormal close or transport failure; reconnect.
    Abnormal { code: u16, reason: String },
}

async fn run_socket(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        {
            let mut state = inner.state.lock().unwrap();
            state.connection = ConnectionState::Connecting;
        }

        let end = match connect_session(&inner, &mut shutdown).await {
            Ok(end) => end,
            Err(err) => {
                inner.emit_error(format!("connection failed: {err}"));
                SessionEnd::Abnormal {
                    code: 1006,
                    reason: err.to_string(),
                }
            }
        };

        match end {
            SessionEnd::Intentional { code, reason } => {
                {
                    let mut state = inner.state.lock().unwrap();
                    state.connection = ConnectionState::Disconnected;
                    if inner.config.resume_key.is_none() {
                        state.session_id = None;
                    }
                    state.shutdown = None;
                }
                info!(node = %inner.config.id, code, "disconnected");
                inner.emit(NodeEvent::Disconnect {
                    node_id: inner.config.id.clone(),
                    code,
                    reason,
                });
                return;
            }
            SessionEnd::Abnormal { code, reason } => {
                let attempt = {
                    let mut state = inner.state.lock().unwrap();
                    state.reconnect_attempts += 1;
                    state.reconnect_attempts
                };

                if attempt > inner.config.max_reconnect_attempts {
                    inner.state.lock().unwrap().connection = ConnectionState::Disconnected;
                    inner.emit(NodeEvent::Disconnect {
                        node_id: inner.config.id.clone(),
                        code,
                        reason,
                    });
                    inner.emit_error(format!(
                        "giving up after {} reconnect attempts",
                        inner.config.max_reconnect_attempts
                    ));
                    return;
                }

                inner.state.lock().unwrap().connection = ConnectionState::Reconnecting;
                inner.emit(NodeEvent::Disconnect {
                    node_id: inner.config.id.clone(),
                    code,
                    reason,
                });

                let delay = reconnect_backoff(inner.config.reconnect_delay, attempt);
                warn!(node = %inner.config.id, attempt, delay_ms = delay.as_millis() as u64,
                    "reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            let mut state = inner.state.lock().unwrap();
                            state.connection = ConnectionState::Disconnected;
                            if inner.config.resume_key.is_none() {
                                state.session_id = None;
                            }
                            state.shutdown = None;
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Open the socket, run the resume/discovery handshake, then pump frames
/// until the connection ends.
async fn connect_session(
    inner: &Arc<NodeInner>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let request = inner.build_ws_request()?;
    debug!(node = %inner.config.id, url = %inner.ws_url(), "connecting");

    let (ws, response) = connect_async(request).await?;
    debug!(node = %inner.config.id, status = ?response.status(), "socket open");

    {
        let mut state = inner.state.lock().unwrap();
        state.connection = ConnectionState::Connected;
        state.reconnect_attempts = 0;
    }
    inner.emit(NodeEvent::Connect {
        node_id: inner.config.id.clone(),
    });

    let (mut sink, mut stream) = ws.split();

    if let Some(key) = &inner.config.resume_key {
        let frame = protocol::configure_resuming(key, inner.config.resume_timeout.as_secs());
        if let Err(err) = sink.send(WsMessage::Text(frame.to_string().into())).await {
            inner.emit_error(format!("configureResuming failed: {err}"));
        }
    }

    // Discovery is forced on every open so a node upgraded while we were
    // away gets re-indexed. Failure is reported but keeps the session.
    let discovery = Arc::clone(inner);
    tokio::spawn(async move {
        if let Err(err) = discovery.refresh_info().await {
            discovery.emit_error(format!("plugin discovery failed: {err}"));
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(close))).await;
                    return Ok(SessionEnd::Intentional {
                        code: 1000,
                        reason: "client disconnect".to_string(),
                    });
                }
            }
            message = stream.next() => match message {
                Some(Ok(WsMessage::Text(text))) => handle_frame(inner, text.as_ref()),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    debug!(node = %inner.config.id, code, reason = %reason, "close frame");
                    return Ok(if code == 1000 {
                        SessionEnd::Intentional { code, reason }
                    } else {
                        SessionEnd::Abnormal { code, reason }
                    });
                }
                Some(Ok(WsMessage::Ping(_))) => trace!(node = %inner.config.id, "ping"),
                Some(Ok(WsMessage::Pong(_))) => trace!(node = %inner.config.id, "pong"),
                Some(Ok(other)) => {
                    debug!(node = %inner.config.id, ?other, "unexpected message");
                }
                Some(Err(err)) => {
                    inner.emit_error(format!("socket error: {err}"));
                    return Ok(SessionEnd::Abnormal {
                        code: 1006,
                        reason: err.to_string(),
                    });
                }
                None => {
                    return Ok(SessionEnd::Abnormal {
                        code: 1006,
                        reason: "stream ended".to_string(),
                    });
                }
            }
        }
    }
}

fn handle_frame(inner: &Arc<NodeInner>, text: &str) {
    if inner.debug_frames {
        debug!(node = %inner.config.id, frame = %text, "frame");
    }
    let frame = match NodeFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(node = %inner.config.id, error = %err, "undecodable frame");
            return;
        }
    };

    let node_id = inner.config.id.clone();
    match frame {
        NodeFrame::Ready(ready) => {
            info!(node = %node_id, session = %ready.session_id, resumed = ready.resumed, "ready");
            inner.state.lock().unwrap().session_id = Some(ready.session_id.clone());
            inner.emit(NodeEvent::Ready {
                node_id,
                session_id: ready.session_id,
                resumed: ready.resumed,
            });
        }
        NodeFrame::Stats(stats) => {
            inner.state.lock().unwrap().stats = Some(stats.clone());
            inner.emit(NodeEvent::Stats { node_id, stats });
        }
        NodeFrame::PlayerUpdate(update) => {
            inner.emit(NodeEvent::PlayerUpdate {
                node_id,
                guild_id: update.guild_id,
                state: update.state,
            });
        }
        NodeFrame::Event(event) => {
            inner.emit(NodeEvent::PlayerEvent {
                node_id,
                guild_id: event.guild_id,
                event: event.event,
            });
        }
        NodeFrame::Unknown(payload) => {
            inner.emit(NodeEvent::Raw { node_id, payload });
        }
    }
}
