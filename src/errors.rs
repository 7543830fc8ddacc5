use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::mcp::rpc::{self, ErrorCode, ErrorObject, RequestId};

/// Failure reported by a capability handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("response already sent")]
    AlreadySent,
    #[error("session {0} is closed")]
    SessionClosed(String),
    #[error("stream write failed: {0}")]
    StreamWrite(String),
    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write response: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to deliver response: {0}")]
    Send(#[from] SendError),
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("graceful shutdown exceeded {0:?}")]
    ShutdownTimedOut(Duration),
    #[error("transport task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A JSON-RPC error envelope answered directly by the HTTP transport, before
/// or instead of dispatching.
#[derive(Debug)]
pub struct HttpRpcError {
    pub status: StatusCode,
    pub response: rpc::Response,
}

impl HttpRpcError {
    pub fn new(
        status: StatusCode,
        id: Option<RequestId>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            response: rpc::Response::failure(id, ErrorObject::new(code, message)),
        }
    }

    pub fn with_data(mut self, data: impl Into<serde_json::Value>) -> Self {
        if let rpc::Outcome::Error(error) = &mut self.response.outcome {
            error.data = Some(data.into());
        }
        self
    }
}

impl IntoResponse for HttpRpcError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                error = ?self.response.error(),
                "request failed with internal error"
            );
        }

        (self.status, Json(self.response)).into_response()
    }
}
