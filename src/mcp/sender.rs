//! Delivery targets for a single dispatch outcome
//!
//! Each transport hands the dispatcher one [`ResponseSender`] per request. The
//! dispatcher never knows whether it is writing a stdio line, an HTTP body or
//! an SSE event.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::errors::SendError;
use crate::mcp::rpc::{ErrorObject, RequestId, Response};

#[async_trait]
pub trait ResponseSender: Send + Sync {
    /// Delivers `response`. Fails with [`SendError::AlreadySent`] on reuse.
    async fn send_response(&self, response: Response) -> Result<(), SendError>;

    async fn send_error(&self, id: Option<RequestId>, error: ErrorObject) -> Result<(), SendError> {
        self.send_response(Response::failure(id, error)).await
    }

    /// True once a delivery has been attempted, whether or not it succeeded.
    fn is_sent(&self) -> bool;
}

/// "Already sent" guard shared by sender implementations.
#[derive(Debug, Default)]
pub struct SendOnce(AtomicBool);

impl SendOnce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> Result<(), SendError> {
        if self.0.swap(true, Ordering::AcqRel) {
            return Err(SendError::AlreadySent);
        }
        Ok(())
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
