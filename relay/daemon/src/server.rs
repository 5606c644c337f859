//! Daemon Server Implementation
//!
//! Hosts the relay over HTTP:
//! - `POST /api/realtime`: scripted event stream, rate-limited per identity
//! - `GET  /api/ws`: duplex tool socket, one [`ToolSession`] per connection
//! - `GET|POST /api/messages`: paged history and message creation
//! - `GET  /api/messages/stream`: newly created messages as `message` frames
//! - `GET  /api/tools`, `POST /api/tools/{tool}`: tool metadata and job submission
//!
//! All long-lived responses (event streams, sockets) end when the server
//! shuts down, so graceful shutdown never waits on an idle client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use relay_core::transport::encode_comment;
use relay_core::{
    page, Broadcaster, CreateMessage, InMemoryMessageRepository, Message, MessagePage,
    MessageRepository, RateLimitResult, RateLimiter, RelayConfigFile, StreamEvent,
    StreamProducer, StreamRequest, ToolDescriptor, ToolRegistry, ToolSession, PAGE_SIZE,
};

const REALTIME_ENDPOINT: &str = "/api/realtime";
const TOOL_SOCKET_ENDPOINT: &str = "/api/ws";
const MESSAGES_ENDPOINT: &str = "/api/messages";
const MESSAGE_STREAM_ENDPOINT: &str = "/api/messages/stream";
const TOOLS_ENDPOINT: &str = "/api/tools";
const TOOL_INVOKE_ENDPOINT: &str = "/api/tools/{tool}";

/// Identity used when no bearer token is presented
const ANONYMOUS: &str = "anonymous";

// =============================================================================
// Shared State
// =============================================================================

/// State shared by every handler
struct AppState {
    config: RelayConfigFile,
    limiter: RateLimiter,
    repository: Arc<dyn MessageRepository>,
    registry: ToolRegistry,
    broadcaster: Broadcaster<Message>,
    producer: StreamProducer,
    /// Live tool sessions by session id
    sessions: DashMap<String, Arc<ToolSession>>,
    shutdown: CancellationToken,
}

impl AppState {
    fn new(config: RelayConfigFile) -> Self {
        let repository: Arc<dyn MessageRepository> = if config.seed_welcome {
            Arc::new(InMemoryMessageRepository::with_welcome())
        } else {
            Arc::new(InMemoryMessageRepository::new())
        };

        Self {
            limiter: RateLimiter::new(config.rate_limit.clone()),
            producer: StreamProducer::new(config.stream.clone()),
            repository,
            registry: ToolRegistry::default(),
            broadcaster: Broadcaster::new(),
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Close every live tool session; returns how many were open
    fn close_sessions(&self) -> usize {
        let mut closed = 0;
        for entry in &self.sessions {
            if entry.value().close() {
                closed += 1;
            }
        }
        self.sessions.clear();
        closed
    }
}

// =============================================================================
// Server
// =============================================================================

/// The relay HTTP server
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    /// Create a server from loaded configuration
    pub fn new(config: RelayConfigFile) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.state.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind relay server on {addr}"))
    }

    fn router(&self) -> Router {
        Router::new()
            .route(REALTIME_ENDPOINT, post(handle_realtime))
            .route(TOOL_SOCKET_ENDPOINT, get(handle_tool_socket))
            .route(
                MESSAGES_ENDPOINT,
                get(handle_list_messages).post(handle_create_message),
            )
            .route(MESSAGE_STREAM_ENDPOINT, get(handle_message_stream))
            .route(TOOLS_ENDPOINT, get(handle_list_tools))
            .route(TOOL_INVOKE_ENDPOINT, post(handle_invoke_tool))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on `listener` until the shutdown token fires
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener
            .local_addr()
            .context("Failed to resolve bound relay address")?;
        info!(addr = %local_addr, "Relay server listening");

        let cleanup = tokio::spawn(evict_idle_buckets(Arc::clone(&self.state)));
        let shutdown = self.state.shutdown.clone();

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.state.shutdown.cancel();
        let closed = self.state.close_sessions();
        if let Err(e) = cleanup.await {
            warn!(error = %e, "Bucket cleanup task failed");
        }

        let metrics = self.state.limiter.metrics();
        info!(
            closed_sessions = closed,
            admitted = metrics.admitted,
            rejected = metrics.rejected,
            "Relay server stopped"
        );
        result.context("Relay server exited unexpectedly")
    }
}

/// Periodically drop rate buckets idle longer than the configured window
async fn evict_idle_buckets(state: Arc<AppState>) {
    let idle = state.config.idle_evict;
    let period = (idle / 2).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = state.limiter.evict_idle(idle);
                if evicted > 0 {
                    debug!(
                        evicted,
                        tracked = state.limiter.tracked_keys(),
                        "Evicted idle rate buckets"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Errors and Identity
// =============================================================================

/// JSON error response
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
            retry_after: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            retry_after: None,
        }
    }

    fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: "rate_limited",
            message: message.into(),
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after {
            let secs = u64::try_from(retry_after.as_millis().div_ceil(1000)).unwrap_or(u64::MAX);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

/// Bearer token from `Authorization`, or `anonymous`
fn request_identity(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map_or_else(|| ANONYMOUS.to_string(), str::to_string)
}

// =============================================================================
// Event Stream
// =============================================================================

async fn handle_realtime(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StreamRequest>,
) -> Response {
    let identity = request_identity(&headers);
    let admission = state.limiter.check(&identity);
    if let RateLimitResult::Rejected { error } = &admission {
        warn!(identity = %identity, "Stream request rate limited");
        return ApiError::rate_limited(error.to_string(), admission.retry_after()).into_response();
    }

    let stream = match state.producer.start(&request, &state.shutdown) {
        Ok(stream) => stream,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };
    debug!(
        identity = %identity,
        session_id = %stream.session().id(),
        "Serving event stream"
    );

    // Dropping the body (client disconnect) drops the receiver and closes the session
    let body = Body::from_stream(stream.into_stream().map(Ok::<_, Infallible>));
    event_stream_response(body)
}

fn event_stream_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
        ],
        body,
    )
        .into_response()
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Deserialize)]
struct CursorQuery {
    cursor: Option<String>,
}

async fn handle_list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CursorQuery>,
) -> Json<MessagePage> {
    let messages = state.repository.list().await;
    Json(page(&messages, query.cursor.as_deref(), PAGE_SIZE))
}

async fn handle_create_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateMessage>,
) -> Response {
    let message = match request.into_message() {
        Ok(message) => message,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };

    state.repository.add(message.clone()).await;
    let delivery = state.broadcaster.publish(&message);
    debug!(
        message_id = %message.id,
        delivered = delivery.delivered,
        pruned = delivery.pruned,
        "Message created"
    );
    (StatusCode::CREATED, Json(message)).into_response()
}

async fn handle_message_stream(State(state): State<Arc<AppState>>) -> Response {
    // Subscribers that disconnect are pruned on the next publish
    let (subscriber, receiver) = state.broadcaster.subscribe();
    debug!(subscriber = %subscriber, "Message stream opened");

    let messages = UnboundedReceiverStream::new(receiver).filter_map(|message| {
        futures::future::ready(match StreamEvent::Message(message).encode() {
            Ok(frame) => Some(Bytes::from(frame)),
            Err(e) => {
                warn!(error = %e, "Failed to encode message frame");
                None
            }
        })
    });

    let period = state.config.stream.heartbeat_interval();
    let pings = IntervalStream::new(tokio::time::interval_at(Instant::now() + period, period))
        .map(|_| Bytes::from(encode_comment("ping")));

    let opening = futures::stream::once(futures::future::ready(Bytes::from(encode_comment(
        "stream-start",
    ))));
    let body = opening
        .chain(futures::stream::select(messages, pings))
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(Ok::<_, Infallible>);

    event_stream_response(Body::from_stream(body))
}

// =============================================================================
// Tools
// =============================================================================

async fn handle_list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolDescriptor>> {
    Json(state.registry.list().to_vec())
}

#[derive(Debug, Deserialize)]
struct InvokeToolRequest {
    #[serde(default)]
    args: Map<String, Value>,
}

async fn handle_invoke_tool(
    State(state): State<Arc<AppState>>,
    Path(tool): Path<String>,
    Json(request): Json<InvokeToolRequest>,
) -> Response {
    if state.registry.get(&tool).is_none() {
        return ApiError::not_found(format!("unknown tool: {tool}")).into_response();
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    info!(job_id = %job_id, tool = %tool, "Tool job accepted");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "tool": tool, "args": request.args })),
    )
        .into_response()
}

// =============================================================================
// Tool Socket
// =============================================================================

async fn handle_tool_socket(
    State(state): State<Arc<AppState>>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket
        .on_upgrade(move |socket| run_tool_socket(state, socket))
        .into_response()
}

async fn run_tool_socket(state: Arc<AppState>, socket: WebSocket) {
    let (session, mut outbound) = ToolSession::open(state.config.tool_session.clone());
    let session = Arc::new(session);
    let session_id = session.id().to_string();
    state
        .sessions
        .insert(session_id.clone(), Arc::clone(&session));

    let span = info_span!("tool_session", session_id = %session_id);
    async {
        let (mut sender, mut receiver) = socket.split();
        loop {
            tokio::select! {
                () = state.shutdown.cancelled() => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
                inbound = receiver.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => session.handle_text(text.as_str()),
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        session.handle_text(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Tool socket read failed");
                        break;
                    }
                },
                Some(message) = outbound.recv() => match serde_json::to_string(&message) {
                    Ok(text) => {
                        if sender.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize server message"),
                },
            }
        }
    }
    .instrument(span)
    .await;

    session.close();
    state.sessions.remove(&session_id);
}

// =============================================================================
// Tests
// =============================================================================
