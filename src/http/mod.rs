//! HTTP surface for the Model Context Protocol
//!
//! Routes `/mcp` (POST requests, GET streams) and `/health`, and owns the
//! registry of resumable SSE sessions.

use axum::http::HeaderName;

pub mod handlers;
pub mod sse;

pub const MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");
