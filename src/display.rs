//! Colored terminal output for answers and retrieved contexts.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;
use serde_json::json;

use crate::knowledge::{KnowledgeNode, SourceError};
use crate::orchestrator::Answer;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_chars` characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_chars: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_chars - 3).collect();
    format!("{kept}...")
}

/// Render an optional score, `N/A` when the source gave none.
#[must_use]
pub fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "N/A".to_string(), |s| format!("{s:.4}"))
}

/// Print the generated answer.
pub fn print_answer(answer: &Answer) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ANSWER]".green().bold(),
        answer.query.cyan()
    );
    println!("{}", answer.answer);
    let _ = io::stdout().flush();
}

/// Print retrieved contexts as numbered blocks.
pub fn print_contexts(nodes: &[KnowledgeNode], raw_mode: bool) {
    if nodes.is_empty() {
        println!("{}", "No context retrieved.".dimmed());
        return;
    }
    for (i, node) in nodes.iter().enumerate() {
        println!(
            "{} {}",
            format!("Context {} (Score: {})", i + 1, format_score(node.score))
                .blue()
                .bold(),
            format!("[{}]", node.source_name).dimmed()
        );
        println!("{}", truncate(&node.text, 500, raw_mode));
    }
    let _ = io::stdout().flush();
}

/// Print sources that failed during retrieval.
pub fn print_failures(failures: &[SourceError]) {
    for failure in failures {
        eprintln!(
            "{} {} {} {}",
            timestamp().dimmed(),
            "[SOURCE]".yellow().bold(),
            failure.source_name.yellow(),
            failure.cause.to_string().dimmed()
        );
    }
}

/// Print a fatal error.
pub fn print_error(message: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        message.red()
    );
}

fn failures_json(failures: &[SourceError]) -> serde_json::Value {
    failures
        .iter()
        .map(|f| {
            json!({
                "source": f.source_name,
                "kind": format!("{:?}", f.kind()),
                "error": f.cause.to_string(),
            })
        })
        .collect()
}

/// JSON form of a retrieval result.
#[must_use]
pub fn retrieval_json(
    query: &str,
    nodes: &[KnowledgeNode],
    failures: &[SourceError],
) -> serde_json::Value {
    json!({
        "query": query,
        "nodes": nodes,
        "failures": failures_json(failures),
    })
}

/// JSON form of an answer.
#[must_use]
pub fn answer_json(answer: &Answer) -> serde_json::Value {
    json!({
        "query_id": answer.query_id.to_string(),
        "query": answer.query,
        "answer": answer.answer,
        "context": answer.context,
        "nodes": answer.nodes,
        "failures": failures_json(&answer.failures),
    })
}
