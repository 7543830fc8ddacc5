//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Provides the JSON-RPC envelope, the capability schema, the single-use
//! response senders and the method dispatcher shared by every transport.

pub mod rpc;
pub mod sender;
pub mod server;
pub mod types;
