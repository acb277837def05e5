//! Newline-delimited JSON transport over a tool process's stdio.
//!
//! Requests are written by a dedicated writer task so a line is never torn
//! when a caller gives up mid-request. A reader task decodes response lines
//! and routes each one to the waiter registered under its id.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::types::{RequestId, ToolRequest, ToolResponse};

/// Number of abandoned request ids remembered for discarding late responses.
const MAX_ABANDONED: usize = 256;

/// Errors from a single request/response exchange.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// A line could not be decoded, or did not match an outstanding request.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No response arrived within the caller's deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The tool process is gone or its streams are closed.
    #[error("tool process unavailable: {0}")]
    SourceUnavailable(String),
}

type Waiter = oneshot::Sender<Result<ToolResponse, TransportError>>;

#[derive(Default)]
struct PendingTable {
    waiting: HashMap<RequestId, Waiter>,
    abandoned: VecDeque<RequestId>,
    closed: Option<String>,
}

impl PendingTable {
    fn abandon(&mut self, id: RequestId) {
        if self.waiting.remove(&id).is_some() {
            self.remember_abandoned(id);
        }
    }

    fn remember_abandoned(&mut self, id: RequestId) {
        if self.abandoned.len() == MAX_ABANDONED {
            self.abandoned.pop_front();
        }
        self.abandoned.push_back(id);
    }

    fn take_abandoned(&mut self, id: RequestId) -> bool {
        match self.abandoned.iter().position(|a| *a == id) {
            Some(pos) => {
                self.abandoned.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Fail every waiter, remembering their ids so late replies are discarded.
    fn fail_outstanding(&mut self, err: &TransportError) {
        let failed: Vec<_> = self.waiting.drain().collect();
        for (id, waiter) in failed {
            let _ = waiter.send(Err(err.clone()));
            self.remember_abandoned(id);
        }
    }

    fn close(&mut self, reason: String) {
        if self.closed.is_none() {
            self.fail_outstanding(&TransportError::SourceUnavailable(reason.clone()));
            self.closed = Some(reason);
        }
    }
}

type SharedTable = Arc<Mutex<PendingTable>>;

fn lock(table: &SharedTable) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the waiter if the request future is dropped before completion.
struct PendingGuard<'a> {
    id: RequestId,
    table: &'a SharedTable,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.table).abandon(self.id);
    }
}

/// Request/response exchange with one tool process.
///
/// Multiple requests may be in flight at once; responses are matched by id,
/// never by arrival order.
#[derive(Debug)]
pub struct ToolTransport {
    outgoing: mpsc::UnboundedSender<String>,
    pending: SharedTable,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("waiting", &self.waiting.len())
            .field("abandoned", &self.abandoned.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ToolTransport {
    /// Start a transport over the given input (tool stdin) and output
    /// (tool stdout) streams.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<W, R>(input: W, output: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending: SharedTable = Arc::new(Mutex::new(PendingTable::default()));
        let (outgoing, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(output, Arc::clone(&pending)));
        let writer = tokio::spawn(write_loop(input, rx, Arc::clone(&pending)));

        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        }
    }

    /// Whether the transport has lost its process streams.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed.is_some()
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        lock(&self.pending).waiting.len()
    }

    /// Invoke `tool` with `params` and wait at most `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if no response arrives in time
    /// - [`TransportError::Protocol`] if the response line is malformed or a
    ///   response for an unknown id arrives while this request is waiting
    /// - [`TransportError::SourceUnavailable`] if the process streams close
    pub async fn send_request(
        &self,
        tool: &str,
        params: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ToolResponse, TransportError> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = ToolRequest::call(id, tool, params);
        let line = request
            .encode_line()
            .map_err(|e| TransportError::Protocol(format!("failed to encode request: {e}")))?;

        let rx = {
            let mut table = lock(&self.pending);
            if let Some(reason) = &table.closed {
                return Err(TransportError::SourceUnavailable(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            table.waiting.insert(id, tx);
            rx
        };
        let _guard = PendingGuard {
            id,
            table: &self.pending,
        };

        tracing::trace!(id = %id, tool, "Sending tool request");
        self.outgoing.send(line).map_err(|_| {
            TransportError::SourceUnavailable("request writer has stopped".to_string())
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::SourceUnavailable(
                "transport closed while waiting for a response".to_string(),
            )),
            Err(_) => {
                tracing::debug!(id = %id, tool, ?timeout, "Tool request timed out");
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

impl Drop for ToolTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop<W>(mut input: W, mut rx: mpsc::UnboundedReceiver<String>, pending: SharedTable)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            input.write_all(line.as_bytes()).await?;
            input.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::debug!(error = %e, "Failed to write to tool stdin");
            lock(&pending).close(format!("failed to write request: {e}"));
            return;
        }
    }
}

async fn read_loop<R>(output: R, pending: SharedTable)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "tool process closed its output".to_string(),
            Ok(_) => match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => dispatch(&pending, line),
                Err(e) => lock(&pending).fail_outstanding(&TransportError::Protocol(format!(
                    "response line is not valid UTF-8: {e}"
                ))),
            },
            Err(e) => break format!("failed to read tool output: {e}"),
        }
    };

    tracing::debug!(reason = %reason, "Tool transport reader stopped");
    lock(&pending).close(reason);
}

fn dispatch(pending: &SharedTable, line: &str) {
    let mut table = lock(pending);

    match ToolResponse::decode(line) {
        Ok(response) => {
            let id = response.id;
            if let Some(waiter) = table.waiting.remove(&id) {
                let _ = waiter.send(Ok(response));
            } else if table.take_abandoned(id) {
                tracing::debug!(id = %id, "Discarding late response for abandoned request");
            } else {
                tracing::warn!(id = %id, "Response id matches no outstanding request");
                table.fail_outstanding(&TransportError::Protocol(format!(
                    "response id {id} does not match any outstanding request"
                )));
            }
        }
        Err(err) => {
            let targeted = err.id.and_then(|id| table.waiting.remove(&id));
            if let Some(waiter) = targeted {
                let _ = waiter.send(Err(TransportError::Protocol(err.reason)));
            } else if err.id.is_some_and(|id| table.take_abandoned(id)) {
                tracing::debug!(error = %err, "Discarding malformed late response");
            } else {
                tracing::warn!(error = %err, "Malformed line from tool");
                table.fail_outstanding(&TransportError::Protocol(err.reason));
            }
        }
    }
}
