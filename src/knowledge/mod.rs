//! Knowledge layer: sources that answer queries, and the store that fans a
//! query out to all of them.
//!
//! Tools may return plain strings or `(score, text)` pairs; both are
//! normalized into [`KnowledgeNode`] at the source boundary so the rest of
//! the pipeline sees one shape.

mod error;
mod node;
mod source;
mod store;

pub use error::*;
pub use node::*;
pub use source::*;
pub use store::*;
