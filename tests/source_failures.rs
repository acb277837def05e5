//! Failure isolation and classification across real tool processes.

mod common;

use std::time::{Duration, Instant};

use noencode_rag::config::KnowledgeSourceConfig;
use noencode_rag::knowledge::{
    ErrorKind, KnowledgeSource, KnowledgeStore, RetrievalError, SourceFailure, ToolKnowledgeSource,
};
use tokio_test::{assert_err, assert_ok};

use common::{echo_source, reply_once_script, sh_source};

fn missing_binary() -> KnowledgeSourceConfig {
    KnowledgeSourceConfig::new(
        "missing",
        "/nonexistent/noencode-rag-tool",
        Vec::new(),
        "KnowledgeTool",
        "query",
    )
}

#[tokio::test]
async fn silent_tool_times_out() {
    let source = ToolKnowledgeSource::new(
        sh_source("silent", "sleep 30").with_timeout(Duration::from_secs(1)),
    );

    let started = Instant::now();
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.source_name, "silent");
    assert_eq!(err.query, "hello");
    assert!(started.elapsed() < Duration::from_secs(10));

    source.shutdown().await;
}

#[tokio::test]
async fn store_bounds_each_source() {
    let store = KnowledgeStore::new()
        .with_source_timeout(Duration::from_millis(300))
        .with_source(ToolKnowledgeSource::new(sh_source("silent", "sleep 30")))
        .with_source(ToolKnowledgeSource::new(echo_source("echo", &[])));

    let started = Instant::now();
    let retrieval = assert_ok!(store.retrieve_detailed("hello", None).await);
    assert!(started.elapsed() < Duration::from_secs(10));

    assert_eq!(retrieval.nodes.len(), 1);
    assert_eq!(retrieval.nodes[0].text, "Echo: hello");
    assert_eq!(retrieval.failures.len(), 1);
    assert_eq!(retrieval.failures[0].source_name, "silent");
    assert_eq!(retrieval.failures[0].kind(), ErrorKind::Timeout);

    store.shutdown().await;
}

#[tokio::test]
async fn exiting_tool_is_unavailable() {
    let source = ToolKnowledgeSource::new(sh_source("gone", "exit 0"));
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
}

#[tokio::test]
async fn missing_binary_is_unavailable() {
    let source = ToolKnowledgeSource::new(missing_binary());
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert!(matches!(err.cause, SourceFailure::Spawn(_)));
}

#[tokio::test]
async fn wrong_id_is_protocol_error() {
    let source = ToolKnowledgeSource::new(sh_source(
        "liar",
        r#"read line; echo '{"id":999999,"result":["x"]}'; sleep 5"#,
    ));
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::Protocol);
    source.shutdown().await;
}

#[tokio::test]
async fn garbage_output_is_protocol_error() {
    let source = ToolKnowledgeSource::new(sh_source(
        "garbage",
        "read line; echo 'this is not json'; sleep 5",
    ));
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::Protocol);
    source.shutdown().await;
}

#[tokio::test]
async fn unsupported_item_is_protocol_error() {
    let source = ToolKnowledgeSource::new(sh_source("numbers", &reply_once_script("[42]")));
    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(matches!(err.cause, SourceFailure::InvalidResult(_)));
    source.shutdown().await;
}

#[tokio::test]
async fn tool_error_response_is_tool_failure() {
    let mut config = echo_source("echo", &[]);
    config.tool_name = "NoSuchTool".to_string();
    let source = ToolKnowledgeSource::new(config);

    let err = assert_err!(source.ask("hello").await);
    assert_eq!(err.kind(), ErrorKind::Tool);
    assert!(err.to_string().contains("NoSuchTool"));

    // A tool-level error leaves the process usable.
    assert!(source.is_running().await);
    source.shutdown().await;
}

#[tokio::test]
async fn one_failing_source_degrades_retrieval() {
    let store = KnowledgeStore::new()
        .with_source(ToolKnowledgeSource::new(missing_binary()))
        .with_source(ToolKnowledgeSource::new(echo_source("echo", &[])));

    let retrieval = assert_ok!(store.retrieve_detailed("hello", None).await);
    assert_eq!(retrieval.nodes.len(), 1);
    assert_eq!(retrieval.nodes[0].source_name, "echo");
    assert_eq!(retrieval.failures.len(), 1);
    assert_eq!(retrieval.failures[0].kind(), ErrorKind::SourceUnavailable);

    store.shutdown().await;
}

#[tokio::test]
async fn all_failing_sources_fail_retrieval() {
    let store = KnowledgeStore::new()
        .with_source(ToolKnowledgeSource::new(missing_binary()))
        .with_source(ToolKnowledgeSource::new(sh_source("gone", "exit 0")));

    let err = assert_err!(store.retrieve("hello", None).await);
    let RetrievalError::AllSourcesFailed { query, failures } = err;
    assert_eq!(query, "hello");
    assert_eq!(failures.len(), 2);
    let names: Vec<&str> = failures.iter().map(|f| f.source_name.as_str()).collect();
    assert_eq!(names, ["missing", "gone"]);
    assert!(failures
        .iter()
        .all(|f| f.kind() == ErrorKind::SourceUnavailable));
}

#[tokio::test]
async fn empty_store_returns_no_nodes() {
    let store = KnowledgeStore::new();
    let nodes = assert_ok!(store.retrieve("hello", Some(3)).await);
    assert!(nodes.is_empty());
}
