//! Axum HTTP handlers for the web server
//!
//! `POST /mcp` negotiates between a single JSON body and an SSE session;
//! `GET /mcp` opens or resumes a stream.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header::ACCEPT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{HttpRpcError, SendError};
use crate::http::sse::{self, SseSender};
use crate::mcp::rpc::{self, ErrorCode, Request, RequestId};
use crate::mcp::sender::{ResponseSender, SendOnce};
use crate::transport::dispatch_with_deadline;
use crate::AppState;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn mcp_options() -> StatusCode {
    StatusCode::OK
}

/// Hands the single response back to the waiting POST handler.
pub struct JsonSender {
    slot: Mutex<Option<oneshot::Sender<rpc::Response>>>,
    once: SendOnce,
}

impl JsonSender {
    pub fn new(tx: oneshot::Sender<rpc::Response>) -> Self {
        Self {
            slot: Mutex::new(Some(tx)),
            once: SendOnce::new(),
        }
    }
}

#[async_trait]
impl ResponseSender for JsonSender {
    async fn send_response(&self, response: rpc::Response) -> Result<(), SendError> {
        self.once.claim()?;
        let tx = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SendError::AlreadySent)?;

        tx.send(response)
            .map_err(|_| SendError::StreamWrite("http response receiver dropped".to_string()))
    }

    fn is_sent(&self) -> bool {
        self.once.is_claimed()
    }
}

struct Negotiated {
    json: bool,
    sse: bool,
}

fn negotiate(headers: &HeaderMap) -> Negotiated {
    let accept = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    Negotiated {
        json: accept.contains("application/json"),
        sse: accept.contains("text/event-stream"),
    }
}

pub async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, HttpRpcError> {
    let unknown_id = Some(RequestId::unknown());
    let bytes = match tokio::time::timeout(
        state.config.read_timeout,
        axum::body::to_bytes(body, MAX_BODY_BYTES),
    )
    .await
    {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            return Err(HttpRpcError::new(
                StatusCode::BAD_REQUEST,
                unknown_id,
                ErrorCode::ParseError,
                "Parse error",
            )
            .with_data(err.to_string()))
        }
        Err(_) => {
            return Err(HttpRpcError::new(
                StatusCode::REQUEST_TIMEOUT,
                unknown_id,
                ErrorCode::ParseError,
                "Request body read timed out",
            ))
        }
    };

    let request: Request = serde_json::from_slice(&bytes).map_err(|err| {
        HttpRpcError::new(
            StatusCode::BAD_REQUEST,
            unknown_id,
            ErrorCode::ParseError,
            "Parse error",
        )
        .with_data(err.to_string())
    })?;

    let negotiated = negotiate(&headers);
    if !negotiated.json && !negotiated.sse {
        return Err(HttpRpcError::new(
            StatusCode::BAD_REQUEST,
            request.id.clone(),
            ErrorCode::InvalidRequest,
            "Accept header must include application/json or text/event-stream",
        ));
    }

    if !request.has_supported_version() {
        return Err(HttpRpcError::new(
            StatusCode::BAD_REQUEST,
            request.id.clone(),
            ErrorCode::InvalidRequest,
            "Invalid JSON-RPC version",
        ));
    }

    if request.is_notification() {
        debug!(method = %request.method, "received notification");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    if negotiated.sse {
        return post_stream(state, &headers, request).await;
    }

    post_json(state, request).await
}

async fn post_json(state: AppState, request: Request) -> Result<Response, HttpRpcError> {
    let id = request.id.clone();
    let (tx, rx) = oneshot::channel();
    let sender = JsonSender::new(tx);
    let cancel = state.shutdown.child_token();

    if let Err(err) = dispatch_with_deadline(
        &state.server,
        request,
        &sender,
        state.config.request_timeout,
        &cancel,
    )
    .await
    {
        debug!(error = %err, "http request finished with error");
    }
    drop(sender);

    match rx.await {
        Ok(response) => Ok((StatusCode::OK, Json(response)).into_response()),
        Err(_) => Err(HttpRpcError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            id,
            ErrorCode::InternalError,
            "No response generated",
        )),
    }
}

async fn post_stream(
    state: AppState,
    headers: &HeaderMap,
    request: Request,
) -> Result<Response, HttpRpcError> {
    let (session, response) = sse::open_session(&state, headers).await?;

    let server = Arc::clone(&state.server);
    let timeout = state.config.request_timeout;
    let cancel = session.cancel_token().child_token();
    tokio::spawn(async move {
        let sender = SseSender::new(Arc::clone(&session));
        if let Err(err) = dispatch_with_deadline(&server, request, &sender, timeout, &cancel).await
        {
            debug!(session_id = %session.id(), error = %err, "sse request finished with error");
        }
        session.finish().await;
    });

    Ok(response)
}

pub async fn mcp_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, HttpRpcError> {
    let (_session, response) = sse::open_session(&state, &headers).await?;
    Ok(response)
}
