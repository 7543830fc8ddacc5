//! HTTP listener with per-connection graceful shutdown
//!
//! Connections are served the way `axum::serve` does it, through hyper-util,
//! so the idle timeout can bound how long a connection may sit without
//! sending its next request head.

use std::{net::SocketAddr, pin::pin, time::Duration};

use async_trait::async_trait;
use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::transport::Transport;
use crate::{build_app, AppState};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct HttpTransport {
    state: AppState,
    bind: SocketAddr,
}

impl HttpTransport {
    pub fn new(state: AppState, bind: SocketAddr) -> Self {
        Self { state, bind }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}

/// Accepts connections until `shutdown` fires, then waits for every
/// connection task to wind down.
async fn accept_loop(
    listener: TcpListener,
    app: Router,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    let connections = TaskTracker::new();

    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            },
        };

        debug!(%remote, "connection accepted");
        connections.spawn(serve_connection(
            stream,
            app.clone(),
            idle_timeout,
            shutdown.clone(),
        ));
    }

    drop(listener);
    connections.close();
    connections.wait().await;
}

async fn serve_connection(
    stream: TcpStream,
    app: Router,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    // HTTP/1 only: version sniffing would wait on a silent client untimed.
    let mut builder = Builder::new(TokioExecutor::new()).http1_only();
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout);

    let mut conn = pin!(builder.serve_connection(TokioIo::new(stream), TowerToHyperService::new(app)));

    tokio::select! {
        served = conn.as_mut() => {
            if let Err(err) = served {
                debug!(error = %err, "connection ended with error");
            }
            return;
        }
        _ = shutdown.cancelled() => {}
    }

    conn.as_mut().graceful_shutdown();
    if let Err(err) = conn.await {
        debug!(error = %err, "connection ended with error during shutdown");
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&self, shutdown: CancellationToken) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.bind.to_string(),
                source,
            })?;
        info!(
            addr = %self.bind,
            idle_timeout_secs = self.state.config.idle_timeout.as_secs(),
            "http transport listening"
        );

        let mut server = tokio::spawn(accept_loop(
            listener,
            build_app(self.state.clone()),
            self.state.config.idle_timeout,
            self.state.shutdown.clone(),
        ));

        tokio::select! {
            joined = &mut server => {
                joined?;
                return Ok(());
            }
            _ = shutdown.cancelled() => {}
        }

        self.stop().await?;

        let budget = self.state.config.shutdown_timeout;
        match tokio::time::timeout(budget, &mut server).await {
            Ok(joined) => {
                joined?;
                info!("http transport stopped");
                Ok(())
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis(), "graceful shutdown timed out, aborting server");
                server.abort();
                Err(TransportError::ShutdownTimedOut(budget))
            }
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let closed = self.state.sessions.close_all();
        self.state.shutdown.cancel();
        info!(closed_sessions = closed, "http transport shutting down");
        Ok(())
    }
}
