use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod security;
pub mod transport;

use config::{Config, ConfigError, TransportKind};
use http::sse::SessionRegistry;
use mcp::server::McpServer;
use transport::{http::HttpTransport, stdio::StdioTransport, Transport};

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: SessionRegistry,
    pub config: Arc<Config>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(server: Arc<McpServer>, config: Config) -> Self {
        Self {
            server,
            sessions: SessionRegistry::new(),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route(
            "/mcp",
            post(http::handlers::mcp_post)
                .get(http::handlers::mcp_get)
                .options(http::handlers::mcp_options),
        )
        .layer(middleware::from_fn(security::warn_on_foreign_origin))
        .layer(security::cors_layer())
        .layer(middleware::from_fn(security::security_headers))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

pub fn create_transport(
    config: &Config,
    server: Arc<McpServer>,
) -> Result<Box<dyn Transport>, ConfigError> {
    match config.transport {
        TransportKind::Stdio => Ok(Box::new(
            StdioTransport::new(server, config.shutdown_timeout)
                .with_request_timeout(config.request_timeout),
        )),
        TransportKind::Http => {
            let bind = config.bind_socket()?;
            Ok(Box::new(HttpTransport::new(
                AppState::new(server, config.clone()),
                bind,
            )))
        }
    }
}
