//! Prompt assembly for answer generation.

use crate::knowledge::KnowledgeNode;

/// Default separator placed between snippets in the context block.
pub const DEFAULT_CONTEXT_SEPARATOR: &str = "\n---\n";

/// System prompt given to the generator.
pub const GENERATOR_SYSTEM_PROMPT: &str = r"You answer questions using the retrieved context supplied with each question.

Prefer facts stated in the context. If the context is empty or does not cover the question, say so briefly before answering from general knowledge.
";

/// Join node texts, in order, into a single context block.
#[must_use]
pub fn build_context(nodes: &[KnowledgeNode], separator: &str) -> String {
    nodes
        .iter()
        .map(|node| node.text.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Format the prompt handed to the generator.
#[must_use]
pub fn build_prompt(context: &str, query: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {query}")
}
