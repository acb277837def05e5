//! Knowledge store: concurrent fan-out to sources and result merging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::orchestrator::{RetrievalEvent, RetrievalObserver, TracingObserver};
use crate::tool::TransportError;

use super::{KnowledgeNode, KnowledgeSource, RetrievalError, SourceError};

/// Default upper bound on one source's share of a fan-out.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Nodes and per-source failures from one retrieval.
#[derive(Debug, Default)]
pub struct Retrieval {
    /// Merged nodes, most relevant first.
    pub nodes: Vec<KnowledgeNode>,
    /// Sources that failed; their nodes are absent from `nodes`.
    pub failures: Vec<SourceError>,
}

/// Aggregates knowledge sources and merges their answers.
pub struct KnowledgeStore {
    sources: Vec<Arc<dyn KnowledgeSource>>,
    source_timeout: Duration,
    observer: Arc<dyn RetrievalObserver>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("sources", &self.source_names())
            .field("source_timeout", &self.source_timeout)
            .finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Set the per-source bound on each fan-out.
    #[must_use]
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Builder form of [`add_source`](Self::add_source).
    #[must_use]
    pub fn with_source(mut self, source: impl KnowledgeSource + 'static) -> Self {
        self.add_source(source);
        self
    }

    /// Register a source. Registration order breaks ties when merging.
    pub fn add_source(&mut self, source: impl KnowledgeSource + 'static) {
        self.add_shared(Arc::new(source));
    }

    /// Register a source the caller keeps a handle to.
    pub fn add_shared(&mut self, source: Arc<dyn KnowledgeSource>) {
        if self.sources.iter().any(|s| s.name() == source.name()) {
            tracing::warn!(source = %source.name(), "Knowledge source name registered twice");
        }
        self.sources.push(source);
    }

    /// Replace the lifecycle observer.
    pub fn set_observer(&mut self, observer: Arc<dyn RetrievalObserver>) {
        self.observer = observer;
    }

    /// Names of the registered sources, in registration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Query every source and return the merged nodes.
    ///
    /// # Errors
    ///
    /// Returns `RetrievalError::AllSourcesFailed` if every source failed.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<KnowledgeNode>, RetrievalError> {
        self.retrieve_detailed(query, top_k)
            .await
            .map(|retrieval| retrieval.nodes)
    }

    /// Query every source concurrently, keeping the failures of sources that
    /// did not answer alongside the merged nodes.
    ///
    /// Each source is bounded by the store's source timeout; a failing source
    /// never cancels its siblings.
    ///
    /// # Errors
    ///
    /// Returns `RetrievalError::AllSourcesFailed` if every source failed.
    pub async fn retrieve_detailed(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Retrieval, RetrievalError> {
        if self.sources.is_empty() {
            tracing::warn!(query = %query, "Retrieval with no knowledge sources registered");
            self.observer.on_event(&RetrievalEvent::RetrievalFinished {
                nodes: 0,
                failed: 0,
            });
            return Ok(Retrieval::default());
        }

        let mut join_set = JoinSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let observer = Arc::clone(&self.observer);
            let query = query.to_string();
            let timeout = self.source_timeout;

            join_set.spawn(async move {
                let result = ask_source(source.as_ref(), &query, timeout, observer.as_ref()).await;
                (index, result)
            });
        }

        let mut outcomes: Vec<Option<Result<Vec<KnowledgeNode>, SourceError>>> =
            (0..self.sources.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => outcomes[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Knowledge source task failed"),
            }
        }

        let mut batches = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (outcome, source) in outcomes.into_iter().zip(&self.sources) {
            match outcome {
                Some(Ok(nodes)) => batches.push(nodes),
                Some(Err(err)) => failures.push(err),
                None => {
                    let err = SourceError::new(
                        source.name(),
                        query,
                        TransportError::SourceUnavailable("source task aborted".to_string()),
                    );
                    self.observer.on_event(&RetrievalEvent::SourceFailed {
                        source: source.name().to_string(),
                        error: err.to_string(),
                    });
                    failures.push(err);
                }
            }
        }

        if failures.len() == self.sources.len() {
            return Err(RetrievalError::AllSourcesFailed {
                query: query.to_string(),
                failures,
            });
        }

        let nodes = merge_nodes(batches, top_k);
        self.observer.on_event(&RetrievalEvent::RetrievalFinished {
            nodes: nodes.len(),
            failed: failures.len(),
        });

        Ok(Retrieval { nodes, failures })
    }

    /// Shut down every source, terminating any tool processes.
    pub async fn shutdown(&self) {
        for source in &self.sources {
            source.shutdown().await;
        }
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn ask_source(
    source: &dyn KnowledgeSource,
    query: &str,
    timeout: Duration,
    observer: &dyn RetrievalObserver,
) -> Result<Vec<KnowledgeNode>, SourceError> {
    observer.on_event(&RetrievalEvent::RequestSent {
        source: source.name().to_string(),
        query: query.to_string(),
    });

    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, source.ask(query)).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::new(
            source.name(),
            query,
            TransportError::Timeout(timeout),
        )),
    };

    match &result {
        Ok(nodes) => observer.on_event(&RetrievalEvent::ResponseReceived {
            source: source.name().to_string(),
            nodes: nodes.len(),
            elapsed: started.elapsed(),
        }),
        Err(err) => observer.on_event(&RetrievalEvent::SourceFailed {
            source: source.name().to_string(),
            error: err.to_string(),
        }),
    }

    result
}

/// Concatenate per-source batches in registration order, then stable-sort by
/// descending score with unscored nodes last, and keep the first `top_k`.
#[must_use]
pub fn merge_nodes(batches: Vec<Vec<KnowledgeNode>>, top_k: Option<usize>) -> Vec<KnowledgeNode> {
    let mut nodes: Vec<KnowledgeNode> = batches.into_iter().flatten().collect();
    nodes.sort_by(KnowledgeNode::relevance_order);
    if let Some(k) = top_k {
        nodes.truncate(k);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct DelayedSource {
        name: &'static str,
        delay: Duration,
        text: &'static str,
    }

    #[async_trait]
    impl KnowledgeSource for DelayedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn ask(&self, _query: &str) -> Result<Vec<KnowledgeNode>, SourceError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![KnowledgeNode::unscored(self.text, self.name)])
        }
    }

    fn delayed(name: &'static str, millis: u64) -> DelayedSource {
        DelayedSource {
            name,
            delay: Duration::from_millis(millis),
            text: name,
        }
    }

    #[tokio::test]
    async fn sources_are_queried_concurrently() {
        let store = KnowledgeStore::new()
            .with_source(delayed("a", 200))
            .with_source(delayed("b", 200))
            .with_source(delayed("c", 200));

        let started = Instant::now();
        let nodes = store.retrieve("q", None).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(550));
        assert_eq!(texts(&nodes), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn slow_source_times_out_alone() {
        let store = KnowledgeStore::new()
            .with_source_timeout(Duration::from_millis(100))
            .with_source(delayed("slow", 10_000))
            .with_source(delayed("fast", 10));

        let retrieval = store.retrieve_detailed("q", None).await.unwrap();

        assert_eq!(texts(&retrieval.nodes), ["fast"]);
        assert_eq!(retrieval.failures.len(), 1);
        assert_eq!(retrieval.failures[0].source_name, "slow");
        assert_eq!(retrieval.failures[0].kind(), crate::knowledge::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn observer_sees_each_source() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut store = KnowledgeStore::new()
            .with_source(delayed("a", 0))
            .with_source(delayed("b", 0));
        store.set_observer(Arc::new(move |event: &RetrievalEvent| {
            sink.lock().unwrap().push(event.clone());
        }));

        store.retrieve("q", None).await.unwrap();

        let events = seen.lock().unwrap();
        let sent = events
            .iter()
            .filter(|e| matches!(e, RetrievalEvent::RequestSent { .. }))
            .count();
        let received = events
            .iter()
            .filter(|e| matches!(e, RetrievalEvent::ResponseReceived { .. }))
            .count();
        assert_eq!((sent, received), (2, 2));
        assert_eq!(
            events.last(),
            Some(&RetrievalEvent::RetrievalFinished {
                nodes: 2,
                failed: 0
            })
        );
    }

    fn texts(nodes: &[KnowledgeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.text.as_str()).collect()
    }

    #[test]
    fn scored_before_unscored() {
        let merged = merge_nodes(
            vec![
                vec![
                    KnowledgeNode::scored(0.9, "a", "ranked"),
                    KnowledgeNode::scored(0.5, "b", "ranked"),
                ],
                vec![KnowledgeNode::unscored("c", "plain")],
            ],
            None,
        );
        assert_eq!(texts(&merged), ["a", "b", "c"]);
    }

    #[test]
    fn unscored_registered_first_still_goes_last() {
        let merged = merge_nodes(
            vec![
                vec![
                    KnowledgeNode::unscored("c1", "plain"),
                    KnowledgeNode::unscored("c2", "plain"),
                ],
                vec![KnowledgeNode::scored(0.1, "low", "ranked")],
            ],
            None,
        );
        assert_eq!(texts(&merged), ["low", "c1", "c2"]);
    }

    #[test]
    fn ties_keep_registration_then_position_order() {
        let merged = merge_nodes(
            vec![
                vec![
                    KnowledgeNode::scored(0.5, "s1-first", "s1"),
                    KnowledgeNode::scored(0.5, "s1-second", "s1"),
                ],
                vec![
                    KnowledgeNode::scored(0.7, "s2-top", "s2"),
                    KnowledgeNode::scored(0.5, "s2-tie", "s2"),
                ],
            ],
            None,
        );
        assert_eq!(
            texts(&merged),
            ["s2-top", "s1-first", "s1-second", "s2-tie"]
        );
    }

    #[test]
    fn top_k_truncates_after_sorting() {
        let batches = vec![
            vec![KnowledgeNode::unscored("c", "plain")],
            vec![
                KnowledgeNode::scored(0.5, "b", "ranked"),
                KnowledgeNode::scored(0.9, "a", "ranked"),
            ],
        ];
        assert_eq!(texts(&merge_nodes(batches.clone(), Some(1))), ["a"]);
        assert!(merge_nodes(batches.clone(), Some(0)).is_empty());
        assert_eq!(merge_nodes(batches, Some(10)).len(), 3);
    }

    #[test]
    fn negative_and_zero_scores_still_rank_above_unscored() {
        let merged = merge_nodes(
            vec![
                vec![KnowledgeNode::unscored("none", "u")],
                vec![
                    KnowledgeNode::scored(-1.0, "neg", "r"),
                    KnowledgeNode::scored(0.0, "zero", "r"),
                ],
            ],
            None,
        );
        assert_eq!(texts(&merged), ["zero", "neg", "none"]);
    }
}
