//! Wire frames for the tool protocol.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":1,"method":"call_tool","params":{"name":"KnowledgeTool","arguments":{"query":"hello"}}}
//! <- {"id":1,"result":["Echo: hello"]}
//! <- {"id":2,"error":"unknown tool: Missing"}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name carried by every tool invocation.
pub const CALL_TOOL_METHOD: &str = "call_tool";

/// Correlation token for one request on one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tool name and argument mapping of a `call_tool` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    /// Registered tool to run on the remote side.
    pub name: String,
    /// Arguments keyed by parameter name.
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// A request frame sent to a tool process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: RequestId,
    pub method: String,
    pub params: CallParams,
}

impl ToolRequest {
    /// Build a `call_tool` request.
    #[must_use]
    pub fn call(id: RequestId, tool: impl Into<String>, arguments: BTreeMap<String, String>) -> Self {
        Self {
            id,
            method: CALL_TOOL_METHOD.to_string(),
            params: CallParams {
                name: tool.into(),
                arguments,
            },
        }
    }

    /// Name of the tool this request targets.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.params.name
    }

    /// Argument mapping of this request.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params.arguments
    }

    /// Serialize to a single newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse a request line.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] carrying the id when one could be recovered.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| DecodeError::new(None, format!("invalid JSON: {e}")))?;
        let id = extract_id(&value);
        serde_json::from_value(value)
            .map_err(|e| DecodeError::new(id, format!("invalid request: {e}")))
    }
}

/// Result or error carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Raw result items, normalized later by the knowledge source.
    Success(Vec<Value>),
    /// Error reported by the tool.
    Failure(String),
}

/// A response frame received from a tool process.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: RequestId,
    pub outcome: ToolOutcome,
}

/// On-the-wire shape of a response; exactly one of `result`/`error` is set.
#[derive(Debug, Serialize, Deserialize)]
struct ResponseFrame {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl ToolResponse {
    /// Successful response with the given items.
    #[must_use]
    pub fn success(id: RequestId, items: Vec<Value>) -> Self {
        Self {
            id,
            outcome: ToolOutcome::Success(items),
        }
    }

    /// Error response with the given message.
    #[must_use]
    pub fn failure(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: ToolOutcome::Failure(message.into()),
        }
    }

    /// Serialize to a single newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        let frame = match &self.outcome {
            ToolOutcome::Success(items) => ResponseFrame {
                id: Some(self.id),
                result: Some(Value::Array(items.clone())),
                error: None,
            },
            ToolOutcome::Failure(message) => ResponseFrame {
                id: Some(self.id),
                result: None,
                error: Some(Value::String(message.clone())),
            },
        };
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse a response line.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the line is not valid JSON, has no id,
    /// carries both or neither of `result`/`error`, or `result` is not an array.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| DecodeError::new(None, format!("invalid JSON: {e}")))?;
        let recovered = extract_id(&value);
        let frame: ResponseFrame = serde_json::from_value(value)
            .map_err(|e| DecodeError::new(recovered, format!("invalid response: {e}")))?;
        let id = frame
            .id
            .ok_or_else(|| DecodeError::new(None, "response has no id"))?;

        let outcome = match (frame.result, frame.error) {
            (Some(Value::Array(items)), None) => ToolOutcome::Success(items),
            (Some(other), None) => {
                return Err(DecodeError::new(
                    Some(id),
                    format!("result must be an array, got {}", kind_of(&other)),
                ))
            }
            (None, Some(error)) => ToolOutcome::Failure(error_message(&error)),
            (Some(_), Some(_)) => {
                return Err(DecodeError::new(
                    Some(id),
                    "response carries both result and error",
                ))
            }
            (None, None) => {
                return Err(DecodeError::new(
                    Some(id),
                    "response carries neither result nor error",
                ))
            }
        };

        Ok(Self { id, outcome })
    }
}

/// A line that could not be decoded into a frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct DecodeError {
    /// Id of the offending frame, when it could be read.
    pub id: Option<RequestId>,
    pub reason: String,
}

impl DecodeError {
    fn new(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

fn extract_id(value: &Value) -> Option<RequestId> {
    value.get("id").and_then(Value::as_u64).map(RequestId)
}

/// Error payloads are plain strings, but JSON-RPC style `{code, message}`
/// objects are accepted too.
fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), String::from),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_args(query: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("query".to_string(), query.to_string())])
    }

    #[test]
    fn request_wire_format() {
        let request = ToolRequest::call(RequestId(7), "KnowledgeTool", query_args("What is MCP?"));
        let line = request.encode_line().unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "method": "call_tool",
                "params": {"name": "KnowledgeTool", "arguments": {"query": "What is MCP?"}}
            })
        );
    }

    #[test]
    fn request_decode_preserves_tool_and_params() {
        let request = ToolRequest::call(RequestId(1), "Search", query_args("multi\nline"));
        let decoded = ToolRequest::decode(&request.encode_line().unwrap()).unwrap();

        assert_eq!(decoded.tool(), "Search");
        assert_eq!(decoded.params(), request.params());
        assert_eq!(decoded.id, RequestId(1));
    }

    #[test]
    fn request_decode_recovers_id_on_bad_shape() {
        let err = ToolRequest::decode(r#"{"id": 4, "method": "call_tool"}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId(4)));
    }

    #[test]
    fn response_decode_result() {
        let response = ToolResponse::decode(r#"{"id":3,"result":["a",[0.5,"b"]]}"#).unwrap();
        assert_eq!(response.id, RequestId(3));
        assert_eq!(
            response.outcome,
            ToolOutcome::Success(vec![json!("a"), json!([0.5, "b"])])
        );
    }

    #[test]
    fn response_decode_error_string_and_object() {
        let response = ToolResponse::decode(r#"{"id":1,"error":"boom"}"#).unwrap();
        assert_eq!(response.outcome, ToolOutcome::Failure("boom".to_string()));

        let response =
            ToolResponse::decode(r#"{"id":1,"error":{"code":-32601,"message":"no such tool"}}"#)
                .unwrap();
        assert_eq!(
            response.outcome,
            ToolOutcome::Failure("no such tool".to_string())
        );
    }

    #[test]
    fn response_decode_rejects_malformed_lines() {
        let err = ToolResponse::decode("not json").unwrap_err();
        assert_eq!(err.id, None);

        let err = ToolResponse::decode(r#"{"result":[]}"#).unwrap_err();
        assert_eq!(err.id, None);

        let err = ToolResponse::decode(r#"{"id":2}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId(2)));
        assert!(err.reason.contains("neither"));

        let err = ToolResponse::decode(r#"{"id":2,"result":[],"error":"x"}"#).unwrap_err();
        assert!(err.reason.contains("both"));

        let err = ToolResponse::decode(r#"{"id":2,"result":"text"}"#).unwrap_err();
        assert!(err.reason.contains("must be an array"));
    }

    #[test]
    fn response_encode_has_exactly_one_payload() {
        let line = ToolResponse::success(RequestId(5), vec![json!("x")])
            .encode_line()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&line).unwrap(),
            json!({"id": 5, "result": ["x"]})
        );

        let line = ToolResponse::failure(RequestId(6), "nope")
            .encode_line()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&line).unwrap(),
            json!({"id": 6, "error": "nope"})
        );
    }
}
