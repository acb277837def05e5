//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use noencode_rag::ai::{GenerationError, Generator};
use noencode_rag::config::KnowledgeSourceConfig;

/// This crate's binary; `echo-tool` mode is the reference stub tool.
pub const BIN: &str = env!("CARGO_BIN_EXE_noencode-rag");

/// Source backed by the stub echo tool, with extra `echo-tool` flags.
pub fn echo_source(name: &str, flags: &[&str]) -> KnowledgeSourceConfig {
    let mut args = vec!["echo-tool".to_string()];
    args.extend(flags.iter().map(ToString::to_string));
    KnowledgeSourceConfig::new(name, BIN, args, "KnowledgeTool", "query")
}

/// Source backed by a `sh -c` one-liner.
pub fn sh_source(name: &str, script: &str) -> KnowledgeSourceConfig {
    KnowledgeSourceConfig::new(
        name,
        "sh",
        vec!["-c".to_string(), script.to_string()],
        "KnowledgeTool",
        "query",
    )
}

/// Shell script that answers the first request with `result` (a JSON array)
/// under the request's own id, then exits.
pub fn reply_once_script(result: &str) -> String {
    format!(
        r#"read line; id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/'); printf '{{"id":%s,"result":{result}}}\n' "$id""#
    )
}

/// Generator that records every prompt and answers with a fixed text.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("stub answer".to_string())
    }
}
