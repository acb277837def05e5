//! Tool process plumbing: spawning, the stdio wire protocol, and a
//! reference server implementation.
//!
//! # Protocol
//!
//! Communication uses JSON-line format over the child's stdin/stdout:
//! - Client writes one request object + newline
//! - Tool writes one response object + newline, echoing the request id
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! use noencode_rag::tool::{ToolCommand, ToolProcess, ToolTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut process = ToolProcess::start(&ToolCommand::new("python3").arg("server.py"))?;
//! let (stdin, stdout) = process.take_stdio()?;
//! let transport = ToolTransport::new(stdin, stdout);
//!
//! let params = BTreeMap::from([("query".to_string(), "What is MCP?".to_string())]);
//! let response = transport
//!     .send_request("KnowledgeTool", params, Duration::from_secs(10))
//!     .await?;
//! println!("{:?}", response.outcome);
//! # Ok(())
//! # }
//! ```

mod process;
mod server;
mod transport;
mod types;

pub use process::*;
pub use server::*;
pub use transport::*;
pub use types::*;
