//! Retrieval orchestration: retrieve, assemble context, generate.
//!
//! One [`RetrievalOrchestrator::answer`] call is one query. Every query is
//! tagged with a fresh id; starting a new query supersedes the previous one,
//! which then returns [`OrchestratorError::Superseded`] instead of a result.

mod events;

pub use events::*;

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::{
    build_context, build_prompt, GenerationError, Generator, DEFAULT_CONTEXT_SEPARATOR,
};
use crate::knowledge::{KnowledgeNode, KnowledgeStore, RetrievalError, SourceError};

/// Errors from answering one query.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("query {query:?} was superseded by a newer query")]
    Superseded { query: String },
}

/// Result of one answered query.
#[derive(Debug)]
pub struct Answer {
    /// Id the query was tagged with.
    pub query_id: Uuid,
    pub query: String,
    /// Generated answer text.
    pub answer: String,
    /// Context handed to the generator.
    pub context: String,
    /// Supporting nodes, most relevant first.
    pub nodes: Vec<KnowledgeNode>,
    /// Sources that failed without failing the whole retrieval.
    pub failures: Vec<SourceError>,
}

/// The query currently allowed to produce an answer.
#[derive(Debug)]
struct CurrentQuery {
    id: Uuid,
    cancel: CancellationToken,
}

/// Drives retrieval and generation for a query.
pub struct RetrievalOrchestrator {
    store: KnowledgeStore,
    generator: Arc<dyn Generator>,
    top_k: Option<usize>,
    separator: String,
    observer: Arc<dyn RetrievalObserver>,
    current: Mutex<Option<CurrentQuery>>,
}

impl std::fmt::Debug for RetrievalOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOrchestrator")
            .field("store", &self.store)
            .field("top_k", &self.top_k)
            .field("separator", &self.separator)
            .finish_non_exhaustive()
    }
}

impl RetrievalOrchestrator {
    /// Create an orchestrator over `store` using `generator` for answers.
    #[must_use]
    pub fn new(store: KnowledgeStore, generator: Arc<dyn Generator>) -> Self {
        Self {
            store,
            generator,
            top_k: None,
            separator: DEFAULT_CONTEXT_SEPARATOR.to_string(),
            observer: Arc::new(TracingObserver),
            current: Mutex::new(None),
        }
    }

    /// Keep at most `top_k` nodes per query.
    #[must_use]
    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    /// Separator placed between node texts in the context.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Report lifecycle events to `observer`, for the store as well.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.store.set_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Retrieve context for `query` and generate an answer from it.
    ///
    /// Zero retrieved nodes is not an error: the generator is called with an
    /// empty context.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Retrieval` if every source failed,
    /// `OrchestratorError::Generation` if the generator failed, and
    /// `OrchestratorError::Superseded` if a newer query started first.
    pub async fn answer(&self, query: &str) -> Result<Answer, OrchestratorError> {
        let (query_id, cancel) = self.begin(query);

        let retrieval = tokio::select! {
            () = cancel.cancelled() => return Err(self.superseded(query_id, query)),
            retrieval = self.store.retrieve_detailed(query, self.top_k) => retrieval?,
        };

        let context = build_context(&retrieval.nodes, &self.separator);
        let prompt = build_prompt(&context, query);
        self.observer.on_event(&RetrievalEvent::GenerationStarted {
            query_id,
            prompt_chars: prompt.chars().count(),
        });

        let answer = tokio::select! {
            () = cancel.cancelled() => return Err(self.superseded(query_id, query)),
            answer = self.generator.generate(&prompt) => answer?,
        };

        if cancel.is_cancelled() {
            return Err(self.superseded(query_id, query));
        }

        self.observer.on_event(&RetrievalEvent::AnswerReady {
            query_id,
            nodes: retrieval.nodes.len(),
        });

        Ok(Answer {
            query_id,
            query: query.to_string(),
            answer,
            context,
            nodes: retrieval.nodes,
            failures: retrieval.failures,
        })
    }

    /// Whether `answer` belongs to the most recently started query.
    #[must_use]
    pub fn is_current(&self, answer: &Answer) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|current| current.id == answer.query_id)
    }

    /// Shut down every knowledge source.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }

    fn begin(&self, query: &str) -> (Uuid, CancellationToken) {
        let query_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(CurrentQuery {
                id: query_id,
                cancel: cancel.clone(),
            });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.observer.on_event(&RetrievalEvent::QueryStarted {
            query_id,
            query: query.to_string(),
        });
        (query_id, cancel)
    }

    fn superseded(&self, query_id: Uuid, query: &str) -> OrchestratorError {
        self.observer
            .on_event(&RetrievalEvent::QuerySuperseded { query_id });
        OrchestratorError::Superseded {
            query: query.to_string(),
        }
    }
}
