//! Normalized retrieval results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single knowledge snippet with optional score and its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Snippet text.
    pub text: String,
    /// Ordering key; higher is more relevant. `None` when the tool does not rank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Name of the knowledge source that produced this node.
    pub source_name: String,
}

/// A result item that is neither a string, a `[score, text]` pair, nor a
/// `{text, score?}` object.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("unsupported result item at index {index}: {item}")]
pub struct InvalidItem {
    pub index: usize,
    pub item: String,
}

impl KnowledgeNode {
    /// Node from a tool that does not rank its results.
    #[must_use]
    pub fn unscored(text: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
            source_name: source_name.into(),
        }
    }

    /// Node with an explicit score.
    #[must_use]
    pub fn scored(score: f64, text: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: Some(score),
            source_name: source_name.into(),
        }
    }

    /// Order by descending score, unscored nodes last.
    ///
    /// Equal scores (and two unscored nodes) compare equal, so a stable sort
    /// keeps their original order.
    #[must_use]
    pub fn relevance_order(&self, other: &Self) -> Ordering {
        match (self.score, other.score) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Turn a tool's raw result items into nodes attributed to `source_name`.
///
/// Accepted shapes per item:
/// - `"text"`: unscored
/// - `[score, "text"]`: scored
/// - `{"text": "...", "score": n}`: scored when `score` is present
///
/// # Errors
///
/// Returns [`InvalidItem`] for the first item in any other shape.
pub fn normalize_items(
    source_name: &str,
    items: Vec<Value>,
) -> Result<Vec<KnowledgeNode>, InvalidItem> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            normalize_item(source_name, item).map_err(|item| InvalidItem {
                index,
                item: item.to_string(),
            })
        })
        .collect()
}

fn normalize_item(source_name: &str, item: Value) -> Result<KnowledgeNode, Value> {
    match item {
        Value::String(text) => Ok(KnowledgeNode::unscored(text, source_name)),
        Value::Array(pair) => {
            let parsed = match pair.as_slice() {
                [Value::Number(score), Value::String(text)] => {
                    score.as_f64().map(|score| (score, text.clone()))
                }
                _ => None,
            };
            match parsed {
                Some((score, text)) => Ok(KnowledgeNode::scored(score, text, source_name)),
                None => Err(Value::Array(pair)),
            }
        }
        Value::Object(map) => {
            let text = map.get("text").and_then(Value::as_str).map(str::to_owned);
            let score = match map.get("score") {
                None | Some(Value::Null) => Some(None),
                Some(value) => value.as_f64().map(Some),
            };
            match (text, score) {
                (Some(text), Some(score)) => Ok(KnowledgeNode {
                    text,
                    score,
                    source_name: source_name.to_string(),
                }),
                _ => Err(Value::Object(map)),
            }
        }
        other => Err(other),
    }
}
