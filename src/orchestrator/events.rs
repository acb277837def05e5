//! Retrieval lifecycle events and observers.
//!
//! The store and orchestrator report progress through an injected
//! [`RetrievalObserver`] instead of writing to shared state, so a UI, a log,
//! or a test can watch a query without the core knowing which.

use std::time::Duration;

use uuid::Uuid;

/// A step in answering one query.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalEvent {
    /// The orchestrator accepted a new query.
    QueryStarted { query_id: Uuid, query: String },
    /// A source was asked for snippets.
    RequestSent { source: String, query: String },
    /// A source answered.
    ResponseReceived {
        source: String,
        nodes: usize,
        elapsed: Duration,
    },
    /// A source failed; the rest of the retrieval continues.
    SourceFailed { source: String, error: String },
    /// All sources finished and results were merged.
    RetrievalFinished { nodes: usize, failed: usize },
    /// The prompt was handed to the generator.
    GenerationStarted { query_id: Uuid, prompt_chars: usize },
    /// The answer is ready for the caller.
    AnswerReady { query_id: Uuid, nodes: usize },
    /// A newer query replaced this one before it finished.
    QuerySuperseded { query_id: Uuid },
}

/// Receives lifecycle events. Must not block.
pub trait RetrievalObserver: Send + Sync {
    fn on_event(&self, event: &RetrievalEvent);
}

impl<F> RetrievalObserver for F
where
    F: Fn(&RetrievalEvent) + Send + Sync,
{
    fn on_event(&self, event: &RetrievalEvent) {
        self(event);
    }
}

/// Observer that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetrievalObserver for TracingObserver {
    fn on_event(&self, event: &RetrievalEvent) {
        match event {
            RetrievalEvent::QueryStarted { query_id, query } => {
                tracing::info!(%query_id, query = %query, "Query started");
            }
            RetrievalEvent::RequestSent { source, query } => {
                tracing::debug!(source = %source, query = %query, "Request sent");
            }
            RetrievalEvent::ResponseReceived {
                source,
                nodes,
                elapsed,
            } => {
                tracing::debug!(source = %source, nodes, ?elapsed, "Response received");
            }
            RetrievalEvent::SourceFailed { source, error } => {
                tracing::warn!(source = %source, error = %error, "Knowledge source failed");
            }
            RetrievalEvent::RetrievalFinished { nodes, failed } => {
                tracing::info!(nodes, failed, "Retrieval finished");
            }
            RetrievalEvent::GenerationStarted {
                query_id,
                prompt_chars,
            } => {
                tracing::info!(%query_id, prompt_chars, "Generating answer");
            }
            RetrievalEvent::AnswerReady { query_id, nodes } => {
                tracing::info!(%query_id, nodes, "Answer ready");
            }
            RetrievalEvent::QuerySuperseded { query_id } => {
                tracing::info!(%query_id, "Query superseded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn closures_are_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = move |event: &RetrievalEvent| sink.lock().unwrap().push(event.clone());

        observer.on_event(&RetrievalEvent::RetrievalFinished {
            nodes: 2,
            failed: 0,
        });

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            [RetrievalEvent::RetrievalFinished {
                nodes: 2,
                failed: 0
            }]
        );
    }

    #[test]
    fn tracing_observer_accepts_every_event() {
        let id = Uuid::new_v4();
        let events = [
            RetrievalEvent::QueryStarted {
                query_id: id,
                query: "q".into(),
            },
            RetrievalEvent::SourceFailed {
                source: "s".into(),
                error: "e".into(),
            },
            RetrievalEvent::QuerySuperseded { query_id: id },
        ];
        for event in &events {
            TracingObserver.on_event(event);
        }
    }
}
