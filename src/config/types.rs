//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tool::ToolCommand;

/// Generator provider kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Claude,
}

/// Configuration for the answer generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Provider to use (gemini or claude).
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model used to generate answers.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum tokens in response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Base URL for the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable name for the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// How to launch and query one knowledge tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeSourceConfig {
    /// Name used to attribute nodes and errors.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Tool to invoke on the remote side.
    pub tool_name: String,
    /// Argument key the query text is passed under.
    #[serde(default = "default_query_param_name")]
    pub query_param_name: String,
    /// Deadline for a single tool request, written as `timeout_ms`.
    #[serde(
        rename = "timeout_ms",
        default = "default_request_timeout",
        with = "millis"
    )]
    pub timeout: Duration,
    /// Extra environment variables for the tool process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the tool process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_query_param_name() -> String {
    "query".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// `Duration` as whole milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl KnowledgeSourceConfig {
    /// Create a source config with default timeout and environment.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        tool_name: impl Into<String>,
        query_param_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            tool_name: tool_name.into(),
            query_param_name: query_param_name.into(),
            timeout: default_request_timeout(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Set the per-request deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline for a single tool request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Launch description for the tool process.
    #[must_use]
    pub fn to_command(&self) -> ToolCommand {
        let mut command = ToolCommand::new(&self.command).args(self.args.iter().cloned());
        for (key, value) in &self.env {
            command = command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command = command.working_dir(dir);
        }
        command
    }
}

/// Retrieval and context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Keep only the first `top_k` nodes after merging.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Upper bound on each source's share of a fan-out, in seconds.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    /// Separator placed between node texts in the context.
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_separator() -> String {
    crate::ai::DEFAULT_CONTEXT_SEPARATOR.to_string()
}

impl RetrievalConfig {
    /// Per-source bound on the fan-out.
    #[must_use]
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: None,
            source_timeout_secs: default_source_timeout_secs(),
            separator: default_separator(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: Vec<KnowledgeSourceConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ai: AiConfig,
}
