//! Transport plumbing shared by stdio and HTTP
//!
//! Every transport runs until its shutdown token is cancelled (or its input
//! ends) and dispatches each request under a deadline and a child token.

pub mod http;
pub mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::{DispatchError, TransportError};
use crate::mcp::rpc::{ErrorCode, ErrorObject, Request};
use crate::mcp::sender::ResponseSender;
use crate::mcp::server::McpServer;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Serves until `shutdown` is cancelled or the transport's input ends.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), TransportError>;

    /// Releases transport-owned resources. Safe to call more than once.
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Runs one dispatch bounded by `timeout` and `cancel`.
///
/// When the dispatch fails before anything was sent, a best-effort
/// InternalError is delivered through the same sender. Notifications are
/// never answered, even on failure.
pub async fn dispatch_with_deadline(
    server: &McpServer,
    request: Request,
    sender: &dyn ResponseSender,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), DispatchError> {
    let id = request.id.clone();
    let method = request.method.clone();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        result = tokio::time::timeout(timeout, server.handle_request(request, sender)) => {
            result.unwrap_or(Err(DispatchError::TimedOut(timeout)))
        }
    };

    let Err(err) = outcome else {
        return Ok(());
    };

    warn!(method = %method, error = %err, "dispatch failed");
    if id.is_some() && !sender.is_sent() {
        let error = ErrorObject::new(ErrorCode::InternalError, "Internal error")
            .with_data(err.to_string());
        if let Err(send_err) = sender.send_error(id, error).await {
            warn!(method = %method, error = %send_err, "failed to deliver dispatch failure");
        }
    }

    Err(err)
}
