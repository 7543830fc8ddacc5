//! Line-delimited JSON-RPC over standard input/output
//!
//! A reader task hands each input line to the dispatch loop through a bounded
//! channel. Requests are dispatched concurrently; every response goes through
//! one mutex-guarded writer so lines never interleave.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{SendError, TransportError};
use crate::mcp::rpc::{recover_request_id, ErrorCode, ErrorObject, Request, RequestId, Response};
use crate::mcp::sender::{ResponseSender, SendOnce};
use crate::mcp::server::McpServer;
use crate::transport::{dispatch_with_deadline, Transport};

pub const STDIO_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Serializes whole lines onto a shared output stream.
pub struct LineWriter<W> {
    inner: Mutex<W>,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), SendError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut writer = self.inner.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

pub struct StdioSender<W> {
    writer: Arc<LineWriter<W>>,
    once: SendOnce,
}

impl<W> StdioSender<W> {
    pub fn new(writer: Arc<LineWriter<W>>) -> Self {
        Self {
            writer,
            once: SendOnce::new(),
        }
    }
}

#[async_trait]
impl<W> ResponseSender for StdioSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_response(&self, response: Response) -> Result<(), SendError> {
        self.once.claim()?;
        self.writer.write_message(&response).await
    }

    fn is_sent(&self) -> bool {
        self.once.is_claimed()
    }
}

pub struct StdioTransport {
    server: Arc<McpServer>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl StdioTransport {
    pub fn new(server: Arc<McpServer>, shutdown_timeout: Duration) -> Self {
        Self {
            server,
            request_timeout: STDIO_REQUEST_TIMEOUT,
            shutdown_timeout,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Serves `reader` until it ends or `shutdown` is cancelled, answering on
    /// `writer`. In-flight requests are drained within the shutdown budget.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(LineWriter::new(writer));
        let (lines_tx, mut lines_rx) = mpsc::channel(1);
        let reader_task = tokio::spawn(read_lines(reader, lines_tx, shutdown.clone()));
        let mut in_flight = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("stdio transport shutting down");
                    break Ok(());
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "stdio dispatch task failed");
                    }
                }
                message = lines_rx.recv() => match message {
                    None => {
                        info!("input closed, exiting");
                        break Ok(());
                    }
                    Some(Err(err)) => {
                        error!(error = %err, "error reading input");
                        break Err(TransportError::Io(err));
                    }
                    Some(Ok(line)) => {
                        self.handle_line(&line, &writer, &shutdown, &mut in_flight).await;
                    }
                },
            }
        };

        reader_task.abort();
        self.drain(in_flight).await;
        result
    }

    async fn handle_line<W>(
        &self,
        line: &str,
        writer: &Arc<LineWriter<W>>,
        shutdown: &CancellationToken,
        in_flight: &mut JoinSet<()>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                let id = recover_request_id(line).unwrap_or_else(RequestId::unknown);
                warn!(id = %id, error = %err, "malformed json-rpc message");
                let response = Response::failure(
                    Some(id),
                    ErrorObject::new(ErrorCode::ParseError, "Parse error").with_data(err.to_string()),
                );
                if let Err(err) = writer.write_message(&response).await {
                    error!(error = %err, "failed to write parse error");
                }
                return;
            }
        };

        if !request.has_supported_version() {
            warn!(version = %request.jsonrpc, method = %request.method, "dropping message with unsupported jsonrpc version");
            return;
        }

        if request.is_notification() {
            debug!(method = %request.method, "received notification");
            return;
        }

        let server = Arc::clone(&self.server);
        let sender = StdioSender::new(Arc::clone(writer));
        let cancel = shutdown.child_token();
        let timeout = self.request_timeout;
        in_flight.spawn(async move {
            if let Err(err) = dispatch_with_deadline(&server, request, &sender, timeout, &cancel).await {
                debug!(error = %err, "stdio request finished with error");
            }
        });
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        let pending = in_flight.len();
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(pending, "abandoning in-flight requests after shutdown budget");
            in_flight.abort_all();
        }
    }
}

/// Forwards each input line, decoded lossily so a stray non-UTF-8 byte only
/// spoils its own line.
async fn read_lines<R>(
    reader: R,
    lines_tx: mpsc::Sender<io::Result<String>>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        let message = match read {
            Ok(0) => return,
            Ok(_) => Ok(decode_line(&buf)),
            Err(err) => Err(err),
        };
        let failed = message.is_err();

        tokio::select! {
            _ = shutdown.cancelled() => return,
            sent = lines_tx.send(message) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if failed {
            return;
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self, shutdown: CancellationToken) -> Result<(), TransportError> {
        info!("starting stdio transport");
        self.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    async fn stop(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
