//! Knowledge source trait and the stdio tool-backed implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::KnowledgeSourceConfig;
use crate::tool::{
    forward_stderr, SpawnError, ToolOutcome, ToolProcess, ToolTransport, TransportError,
};

use super::{normalize_items, KnowledgeNode, SourceError, SourceFailure};

/// Grace period given to a tool process between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A source of knowledge snippets for a natural-language query.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Unique name for this source.
    fn name(&self) -> &str;

    /// Ask for snippets relevant to `query`, in the source's own order.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] naming this source and the query.
    async fn ask(&self, query: &str) -> Result<Vec<KnowledgeNode>, SourceError>;

    /// Release any resources held by the source.
    async fn shutdown(&self) {}
}

/// Live process and transport for a [`ToolKnowledgeSource`].
#[derive(Debug)]
struct Connection {
    process: ToolProcess,
    transport: ToolTransport,
}

/// Knowledge source backed by an external tool speaking the stdio protocol.
///
/// The tool process is spawned lazily on the first [`ask`](KnowledgeSource::ask)
/// (or by [`start`](Self::start)) and reused for later queries. Requests are
/// serialized: at most one is in flight per process. If the process dies, it
/// is terminated and forgotten, and the next query starts a fresh one.
#[derive(Debug)]
pub struct ToolKnowledgeSource {
    config: KnowledgeSourceConfig,
    connection: Mutex<Option<Connection>>,
}

impl ToolKnowledgeSource {
    /// Create a source from its configuration. No process is started yet.
    #[must_use]
    pub fn new(config: KnowledgeSourceConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Start the tool process now instead of on the first query.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process cannot be started.
    pub async fn start(&self) -> Result<(), SpawnError> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(self.connect()?);
        }
        Ok(())
    }

    /// Whether a tool process is currently running for this source.
    pub async fn is_running(&self) -> bool {
        let mut slot = self.connection.lock().await;
        slot.as_mut()
            .is_some_and(|conn| conn.process.is_alive() && !conn.transport.is_closed())
    }

    /// Terminate the tool process, if any. Safe to call repeatedly.
    pub async fn terminate(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(conn) = connection {
            self.close(conn).await;
        }
    }

    fn connect(&self) -> Result<Connection, SpawnError> {
        let command = self.config.to_command();
        tracing::info!(source = %self.config.name, command = %command.display(), "Starting knowledge tool");

        let mut process = ToolProcess::start(&command)?;
        let (stdin, stdout) = process.take_stdio()?;
        if let Some(stderr) = process.take_stderr() {
            forward_stderr(self.config.name.clone(), stderr);
        }

        Ok(Connection {
            process,
            transport: ToolTransport::new(stdin, stdout),
        })
    }

    async fn close(&self, mut conn: Connection) {
        let status = conn.process.try_wait().ok().flatten();
        drop(conn.transport);
        if let Err(e) = conn.process.terminate(TERMINATE_GRACE).await {
            tracing::warn!(source = %self.config.name, error = %e, "Failed to terminate knowledge tool");
        }
        tracing::debug!(source = %self.config.name, exit_status = ?status, "Knowledge tool stopped");
    }

    fn fail(&self, query: &str, cause: impl Into<SourceFailure>) -> SourceError {
        SourceError::new(&self.config.name, query, cause)
    }
}

#[async_trait]
impl KnowledgeSource for ToolKnowledgeSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn ask(&self, query: &str) -> Result<Vec<KnowledgeNode>, SourceError> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            *slot = Some(self.connect().map_err(|e| self.fail(query, e))?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(self.fail(
                query,
                TransportError::SourceUnavailable("tool process not started".to_string()),
            ));
        };

        let params = BTreeMap::from([(self.config.query_param_name.clone(), query.to_string())]);
        let result = conn
            .transport
            .send_request(&self.config.tool_name, params, self.config.request_timeout())
            .await;

        match result {
            Ok(response) => match response.outcome {
                ToolOutcome::Success(items) => {
                    normalize_items(&self.config.name, items).map_err(|e| self.fail(query, e))
                }
                ToolOutcome::Failure(message) => Err(self.fail(query, SourceFailure::Tool(message))),
            },
            Err(err @ TransportError::SourceUnavailable(_)) => {
                if let Some(conn) = slot.take() {
                    self.close(conn).await;
                }
                Err(self.fail(query, err))
            }
            Err(err) => Err(self.fail(query, err)),
        }
    }

    async fn shutdown(&self) {
        self.terminate().await;
    }
}
