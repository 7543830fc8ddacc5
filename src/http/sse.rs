//! Resumable Server-Sent-Events sessions
//!
//! A session owns a bounded channel of events feeding its response body. Every
//! event is queued under the session's lock, so ids leave in ascending order.
//! The registry only tracks membership; closing is the session's own state,
//! and only the connection that opened a session ever closes it.

use std::{
    collections::HashMap,
    convert::Infallible,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    http::{
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{HttpRpcError, SendError};
use crate::http::{LAST_EVENT_ID, MCP_SESSION_ID};
use crate::mcp::rpc::{self, ErrorCode};
use crate::mcp::sender::{ResponseSender, SendOnce};
use crate::AppState;

const SESSION_BUFFER: usize = 64;
const HANDSHAKE_EVENT: &str = "connected";

struct SessionWriter {
    tx: Option<mpsc::Sender<Event>>,
    next_event_id: u64,
}

pub struct SseSession {
    id: String,
    writer: Mutex<SessionWriter>,
    closed: AtomicBool,
    cancel: CancellationToken,
    write_timeout: Duration,
}

impl SseSession {
    /// Creates a session whose first event carries `next_event_id`, returning
    /// the receiving half of its body channel.
    pub fn open(
        id: impl Into<String>,
        next_event_id: u64,
        write_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let session = Arc::new(Self {
            id: id.into(),
            writer: Mutex::new(SessionWriter {
                tx: Some(tx),
                next_event_id,
            }),
            closed: AtomicBool::new(false),
            cancel,
            write_timeout,
        });
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes abruptly: later writes fail and the body ends without draining.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Closes gracefully: frames already queued still reach the client.
    pub async fn finish(&self) {
        let mut writer = self.writer.lock().await;
        self.closed.store(true, Ordering::Release);
        writer.tx = None;
    }

    /// Queues `payload` as the next event, returning the event id used.
    pub async fn send_event<T: Serialize + ?Sized>(
        &self,
        event: Option<&str>,
        payload: &T,
    ) -> Result<u64, SendError> {
        let data = serde_json::to_string(payload)?;

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(SendError::SessionClosed(self.id.clone()));
        }
        let Some(tx) = writer.tx.as_ref() else {
            return Err(SendError::SessionClosed(self.id.clone()));
        };

        let event_id = writer.next_event_id;
        let mut frame = Event::default().id(event_id.to_string());
        if let Some(event) = event {
            frame = frame.event(event);
        }
        if let Err(err) = tx.send_timeout(frame.data(data), self.write_timeout).await {
            warn!(session_id = %self.id, event_id, error = %err, "sse write failed, closing session");
            self.close();
            return Err(SendError::StreamWrite(err.to_string()));
        }

        writer.next_event_id += 1;
        Ok(event_id)
    }
}

/// Live sessions by id. A reused id stacks the newer session on top of the
/// older one; lookups see the newest and removal only takes out the caller's.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Vec<Arc<SseSession>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<SseSession>) {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.entry(session.id.clone()).or_default();
        if !entry.is_empty() {
            debug!(session_id = %session.id, live = entry.len(), "session id shared by another stream");
        }
        entry.push(session);
    }

    /// Removes exactly `session`, leaving other streams under its id alone.
    pub fn remove(&self, session: &Arc<SseSession>) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = sessions.get_mut(&session.id) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|current| !Arc::ptr_eq(current, session));
        let removed = entry.len() != before;
        if entry.is_empty() {
            sessions.remove(&session.id);
        }
        removed
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<Arc<SseSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|entry| entry.last().cloned())
    }

    /// Marks every registered session closed; their streams end on their own.
    pub fn close_all(&self) -> usize {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut closed = 0;
        for session in sessions.values().flatten() {
            session.close();
            closed += 1;
        }
        closed
    }

    /// Number of distinct session ids with at least one live stream.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tears the session down once the response body is dropped.
struct SessionGuard {
    session: Arc<SseSession>,
    registry: SessionRegistry,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
        if self.registry.remove(&self.session) {
            debug!(session_id = %self.session.id, "sse session removed");
        }
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

struct SessionStream {
    events: EventStream,
    _guard: SessionGuard,
}

impl SessionStream {
    fn new(rx: mpsc::Receiver<Event>, guard: SessionGuard) -> Self {
        let events: EventStream = ReceiverStream::new(rx)
            .map(Ok)
            .take_until(guard.session.cancel.clone().cancelled_owned())
            .boxed();
        Self {
            events,
            _guard: guard,
        }
    }
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

pub struct SseSender {
    session: Arc<SseSession>,
    once: SendOnce,
}

impl SseSender {
    pub fn new(session: Arc<SseSession>) -> Self {
        Self {
            session,
            once: SendOnce::new(),
        }
    }
}

#[async_trait]
impl ResponseSender for SseSender {
    async fn send_response(&self, response: rpc::Response) -> Result<(), SendError> {
        self.once.claim()?;
        self.session.send_event(None, &response).await.map(|_| ())
    }

    fn is_sent(&self) -> bool {
        self.once.is_claimed()
    }
}

fn next_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(0, |last| last.saturating_add(1))
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(MCP_SESSION_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            format!("session_{nanos}")
        })
}

fn stream_error(message: &str, data: impl Into<serde_json::Value>) -> HttpRpcError {
    HttpRpcError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        None,
        ErrorCode::InternalError,
        message,
    )
    .with_data(data)
}

/// Opens (or resumes) a session, registers it and pushes the handshake.
pub async fn open_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Arc<SseSession>, Response), HttpRpcError> {
    if state.shutdown.is_cancelled() {
        return Err(stream_error(
            "Streaming unsupported",
            "transport is shutting down",
        ));
    }

    let id = session_id(headers);
    let header_id = HeaderValue::from_str(&id)
        .map_err(|err| stream_error("Invalid session id", err.to_string()))?;
    let next_event_id = next_event_id(headers);
    let (session, rx) = SseSession::open(
        id.clone(),
        next_event_id,
        state.config.write_timeout,
        state.shutdown.child_token(),
    );

    state.sessions.insert(Arc::clone(&session));
    let guard = SessionGuard {
        session: Arc::clone(&session),
        registry: state.sessions.clone(),
    };

    let handshake = json!({
        "sessionId": id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    session
        .send_event(Some(HANDSHAKE_EVENT), &handshake)
        .await
        .map_err(|err| stream_error("Failed to open stream", err.to_string()))?;

    let mut response = Sse::new(SessionStream::new(rx, guard)).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    response_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response_headers.insert(MCP_SESSION_ID, header_id);

    info!(session_id = %id, next_event_id, "sse session opened");
    Ok((session, response))
}
