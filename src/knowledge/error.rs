//! Knowledge retrieval error types.

use crate::tool::{SpawnError, TransportError};

use super::InvalidItem;

/// Coarse classification of a source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed message or result.
    Protocol,
    /// No response within the deadline.
    Timeout,
    /// The tool process died or never started.
    SourceUnavailable,
    /// The tool answered with an error.
    Tool,
}

/// Underlying cause of a source failure.
#[derive(thiserror::Error, Debug)]
pub enum SourceFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to start tool: {0}")]
    Spawn(#[from] SpawnError),

    #[error("invalid tool result: {0}")]
    InvalidResult(#[from] InvalidItem),

    #[error("tool reported an error: {0}")]
    Tool(String),
}

impl SourceFailure {
    /// Classify this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::Protocol(_)) | Self::InvalidResult(_) => {
                ErrorKind::Protocol
            }
            Self::Transport(TransportError::Timeout(_)) => ErrorKind::Timeout,
            Self::Transport(TransportError::SourceUnavailable(_)) | Self::Spawn(_) => {
                ErrorKind::SourceUnavailable
            }
            Self::Tool(_) => ErrorKind::Tool,
        }
    }
}

/// A knowledge source failed to answer a query.
#[derive(thiserror::Error, Debug)]
#[error("knowledge source '{source_name}' failed for query {query:?}: {cause}")]
pub struct SourceError {
    pub source_name: String,
    pub query: String,
    #[source]
    pub cause: SourceFailure,
}

impl SourceError {
    /// Attach source name and query to a failure.
    #[must_use]
    pub fn new(
        source_name: impl Into<String>,
        query: impl Into<String>,
        cause: impl Into<SourceFailure>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            query: query.into(),
            cause: cause.into(),
        }
    }

    /// Classify this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

/// Errors from a whole retrieval across all sources.
#[derive(thiserror::Error, Debug)]
pub enum RetrievalError {
    /// Every registered source failed.
    #[error("all {} knowledge sources failed for query {query:?}", .failures.len())]
    AllSourcesFailed {
        query: String,
        failures: Vec<SourceError>,
    },
}
