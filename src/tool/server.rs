//! Reference tool server speaking the stdio wire protocol.
//!
//! Used by the `echo-tool` subcommand and by tests as a stand-in for a
//! third-party knowledge tool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::types::{ToolRequest, ToolResponse, CALL_TOOL_METHOD};

/// Handler for one named tool: arguments in, result items or error message out.
pub type ToolHandler =
    Arc<dyn Fn(&BTreeMap<String, String>) -> Result<Vec<Value>, String> + Send + Sync>;

/// Errors that stop a server loop.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Dispatches `call_tool` requests to registered handlers.
#[derive(Clone, Default)]
pub struct ToolServer {
    tools: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolServer {
    /// Create a server with no tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler under `name`.
    #[must_use]
    pub fn with_tool<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&BTreeMap<String, String>) -> Result<Vec<Value>, String> + Send + Sync + 'static,
    {
        self.tools.insert(name.into(), Arc::new(handler));
        self
    }

    /// A server with one tool that echoes `prefix + query` back.
    ///
    /// With a `score`, the single item is emitted as a `[score, text]` pair.
    #[must_use]
    pub fn echo(
        tool_name: impl Into<String>,
        query_param: impl Into<String>,
        prefix: impl Into<String>,
        score: Option<f64>,
    ) -> Self {
        let query_param = query_param.into();
        let prefix = prefix.into();
        Self::new().with_tool(tool_name, move |args| {
            let query = args
                .get(&query_param)
                .ok_or_else(|| format!("missing argument: {query_param}"))?;
            let text = format!("{prefix}{query}");
            Ok(vec![match score {
                Some(score) => serde_json::json!([score, text]),
                None => Value::String(text),
            }])
        })
    }

    /// Names of the registered tools, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Answer one request line.
    ///
    /// Returns `None` when no id can be recovered, since there is nothing to
    /// correlate an error response with.
    #[must_use]
    pub fn handle_line(&self, line: &str) -> Option<ToolResponse> {
        let request = match ToolRequest::decode(line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed request line");
                return err.id.map(|id| ToolResponse::failure(id, err.reason));
            }
        };

        tracing::debug!(id = %request.id, tool = %request.tool(), "Received tool request");

        if request.method != CALL_TOOL_METHOD {
            return Some(ToolResponse::failure(
                request.id,
                format!("unknown method: {}", request.method),
            ));
        }

        let response = match self.tools.get(request.tool()) {
            Some(handler) => match handler(request.params()) {
                Ok(items) => ToolResponse::success(request.id, items),
                Err(message) => ToolResponse::failure(request.id, message),
            },
            None => ToolResponse::failure(request.id, format!("unknown tool: {}", request.tool())),
        };
        Some(response)
    }

    /// Serve requests from `input`, writing responses to `output`, until EOF.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                output.write_all(response.encode_line()?.as_bytes()).await?;
                output.flush().await?;
            }
        }

        tracing::debug!("Tool server input closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{RequestId, ToolOutcome};

    fn request_line(id: u64, tool: &str, query: &str) -> String {
        ToolRequest::call(
            RequestId(id),
            tool,
            BTreeMap::from([("query".to_string(), query.to_string())]),
        )
        .encode_line()
        .unwrap()
    }

    #[test]
    fn echo_tool_answers_with_prefix() {
        let server = ToolServer::echo("KnowledgeTool", "query", "Echo: ", None);
        let response = server
            .handle_line(&request_line(1, "KnowledgeTool", "hello"))
            .unwrap();

        assert_eq!(response.id, RequestId(1));
        assert_eq!(
            response.outcome,
            ToolOutcome::Success(vec![Value::String("Echo: hello".to_string())])
        );
    }

    #[test]
    fn echo_tool_with_score_emits_pair() {
        let server = ToolServer::echo("KnowledgeTool", "query", "", Some(0.5));
        let response = server
            .handle_line(&request_line(2, "KnowledgeTool", "x"))
            .unwrap();

        assert_eq!(
            response.outcome,
            ToolOutcome::Success(vec![serde_json::json!([0.5, "x"])])
        );
    }

    #[test]
    fn unknown_tool_is_error_response() {
        let server = ToolServer::echo("KnowledgeTool", "query", "", None);
        let response = server.handle_line(&request_line(3, "Other", "x")).unwrap();

        assert_eq!(
            response.outcome,
            ToolOutcome::Failure("unknown tool: Other".to_string())
        );
    }

    #[test]
    fn missing_argument_is_error_response() {
        let server = ToolServer::echo("KnowledgeTool", "question", "", None);
        let response = server
            .handle_line(&request_line(4, "KnowledgeTool", "x"))
            .unwrap();

        assert_eq!(
            response.outcome,
            ToolOutcome::Failure("missing argument: question".to_string())
        );
    }

    #[test]
    fn unreadable_line_gets_no_response() {
        let server = ToolServer::new();
        assert!(server.handle_line("{{{").is_none());
        assert!(server.handle_line(r#"{"id": 9}"#).is_some());
    }

    #[tokio::test]
    async fn serve_until_eof() {
        let server = ToolServer::echo("KnowledgeTool", "query", "Echo: ", None);
        let input = format!(
            "{}\n{}",
            request_line(1, "KnowledgeTool", "a"),
            request_line(2, "KnowledgeTool", "b")
        );
        let mut output = Vec::new();

        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<ToolResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| ToolResponse::decode(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].id, RequestId(2));
    }
}
