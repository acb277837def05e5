//! noencode-rag - Retrieval-augmented generation over external knowledge tools.
//!
//! Queries are sent as plain text to tool processes over a newline-delimited
//! JSON protocol instead of being embedded; the answers are merged, joined
//! into a context, and handed to a generator.

pub mod ai;
pub mod config;
pub mod display;
pub mod knowledge;
pub mod orchestrator;
pub mod tool;
