//! Answer generation over retrieved context.

mod client;
mod prompts;

pub use client::*;
pub use prompts::*;
