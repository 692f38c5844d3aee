//! JSON-RPC connection over a child process's stdio streams.
//!
//! One connection owns the write half of stdin and a background reader task
//! on stdout. Many calls may be in flight at once: each registers a oneshot
//! sink in the correlation map under its call id and the reader task routes
//! every parseable response line to the matching sink. Entries are removed
//! deterministically — on match or on the call's own deadline — so a
//! long-lived connection never accumulates dead listeners.
//!
//! The connection is generic over `AsyncRead`/`AsyncWrite`, which keeps the
//! protocol logic testable against in-memory pipes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::framing::LineAccumulator;
use crate::errors::McpError;
use crate::types::JsonRpcRequest;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Deadline for `tools/call` and `tools/list` responses.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the `initialize` response.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// MCP protocol revision announced in the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Read buffer size for the stdout reader task.
const READ_CHUNK: usize = 4096;

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

// ─── StdioConnection ─────────────────────────────────────────────────────────

/// Duplex JSON-RPC connection multiplexing concurrent calls by id.
pub struct StdioConnection {
    server_name: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingCalls,
    /// Set exactly once, after the handshake completes.
    initialized: AtomicBool,
    /// Serializes the handshake so concurrent first calls trigger it once.
    init_lock: Mutex<()>,
    call_timeout: Duration,
    handshake_timeout: Duration,
    reader: JoinHandle<()>,
}

impl StdioConnection {
    /// Wire a connection over a pair of byte streams and start the reader.
    pub fn new<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(read_loop(
            server_name.to_string(),
            reader,
            Arc::clone(&pending),
        ));

        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Box::new(writer)),
            pending,
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            call_timeout: CALL_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            reader: reader_task,
        }
    }

    /// Override the call deadline (tests use short ones).
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the handshake deadline (tests use short ones).
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Whether the initialize exchange has completed on this connection.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Number of calls currently awaiting a response.
    pub async fn pending_calls(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Perform the initialize handshake exactly once.
    ///
    /// Concurrent callers all wait on the same in-flight handshake; none of
    /// them sends a second `initialize`.
    pub async fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        // A racer may have finished the handshake while we waited
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "deskpilot",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        match self
            .call_with_timeout(None, "initialize", params, self.handshake_timeout)
            .await
        {
            Ok(_result) => {}
            Err(McpError::CallTimeout { .. }) => {
                return Err(McpError::HandshakeTimeout {
                    server: self.server_name.clone(),
                });
            }
            Err(e) => {
                return Err(McpError::HandshakeFailed {
                    server: self.server_name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // Fire-and-forget completion notification; no reply is expected
        self.notify("notifications/initialized", json!({}))
            .await
            .map_err(|e| McpError::HandshakeFailed {
                server: self.server_name.clone(),
                reason: e.to_string(),
            })?;

        self.initialized.store(true, Ordering::Release);
        tracing::info!(server = %self.server_name, "handshake complete");
        Ok(())
    }

    /// Issue a request and wait for its correlated response.
    ///
    /// Returns the envelope's `result`; an envelope-level `error` maps to
    /// [`McpError::ServerError`]. A missing response resolves to
    /// [`McpError::CallTimeout`] without affecting other in-flight calls.
    pub async fn call(
        &self,
        id: Option<String>,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        self.call_with_timeout(id, method, params, self.call_timeout)
            .await
    }

    async fn call_with_timeout(
        &self,
        id: Option<String>,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, McpError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(&id, method, Some(params));
        if let Err(e) = self.send_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let envelope = match timeout(deadline, rx).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(_)) => {
                // The sink was dropped without a send — the connection is gone
                return Err(McpError::Transport {
                    server: self.server_name.clone(),
                    reason: "connection closed while awaiting response".to_string(),
                });
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(
                    server = %self.server_name,
                    method,
                    id = %id,
                    timeout_secs = deadline.as_secs(),
                    "call timed out"
                );
                return Err(McpError::CallTimeout {
                    server: self.server_name.clone(),
                    method: method.to_string(),
                    timeout_secs: deadline.as_secs(),
                });
            }
        };

        if let Some(error) = envelope.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error")
                .to_string();
            return Err(McpError::ServerError { message });
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.send_line(&notification).await
    }

    /// Write one message as a newline-terminated JSON line.
    ///
    /// Each line is complete and independently parseable, so no ordering
    /// beyond the byte stream itself is needed between concurrent writers.
    async fn send_line<T: serde::Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message).map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport {
                server: self.server_name.clone(),
                reason: format!("failed to write request: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to flush request: {e}"),
        })
    }
}

impl Drop for StdioConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ─── Reader Task ─────────────────────────────────────────────────────────────

/// Drain stdout chunks, reassemble lines, and route responses by id.
///
/// Ends at EOF or read error. Pending calls are left to resolve through
/// their own deadlines rather than being cancelled here.
async fn read_loop<R>(server_name: String, mut reader: R, pending: PendingCalls)
where
    R: AsyncRead + Send + Unpin,
{
    let mut acc = LineAccumulator::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(server = %server_name, "server stdout closed");
                break;
            }
            Ok(n) => {
                for line in acc.push(&chunk[..n]) {
                    dispatch_line(&server_name, &line, &pending).await;
                }
            }
            Err(e) => {
                tracing::debug!(server = %server_name, error = %e, "stdout read failed");
                break;
            }
        }
    }
}

/// Match one stdout line against the pending-call map.
///
/// Anything that is not a JSON document addressed to a pending call is
/// logged and dropped; noise on the stream must never fail a call.
async fn dispatch_line(server_name: &str, line: &str, pending: &PendingCalls) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    // Only lines that look like JSON documents are candidates; everything
    // else is diagnostic output the server wrote to stdout
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        tracing::debug!(server = %server_name, line = trimmed, "skipping non-JSON stdout line");
        return;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(
                server = %server_name,
                error = %e,
                "skipping unparseable stdout line"
            );
            return;
        }
    };

    let Some(id) = response_id(&value) else {
        // Server-initiated notification; nothing is waiting on it
        tracing::debug!(server = %server_name, "ignoring message without a call id");
        return;
    };

    match pending.lock().await.remove(&id) {
        Some(sink) => {
            // The caller may have timed out between lookup and send
            let _ = sink.send(value);
        }
        None => {
            tracing::debug!(
                server = %server_name,
                id = %id,
                "response id matches no pending call"
            );
        }
    }
}

/// Extract a response id, accepting strings and (defensively) numbers.
fn response_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
