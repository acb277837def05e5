//! Config file discovery, parsing and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{AppConfig, KnowledgeSourceConfig};

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".noencode-rag.toml";

/// Finds and parses the TOML config file.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader over the local file, then the user config directory.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .noencode-rag.toml
        search_paths.push(PathBuf::from(LOCAL_CONFIG_FILE));

        // 2. User config directory: ~/.config/noencode-rag/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("noencode-rag").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Loader that only looks at `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed,
    /// or validated.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let Some(path) = self.find_config_file() else {
            tracing::debug!(searched = ?self.search_paths, "No config file found, using defaults");
            return Ok(AppConfig::default());
        };
        tracing::debug!(path = %path.display(), "Loading config file");
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path.
    fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        validate(&config)?;
        Ok(config)
    }

    /// Locations checked by [`load`](Self::load), highest priority first.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First search path that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Check source definitions for empty fields and duplicate names.
///
/// # Errors
///
/// Returns `ConfigError::InvalidSource` for the first offending source.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    validate_sources(&config.sources)
}

/// Same checks as [`validate`], for sources assembled outside a config file.
///
/// # Errors
///
/// Returns `ConfigError::InvalidSource` for the first offending source.
pub fn validate_sources(sources: &[KnowledgeSourceConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in sources {
        let invalid = |reason: &str| ConfigError::InvalidSource {
            name: source.name.clone(),
            reason: reason.to_string(),
        };

        if source.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if source.command.trim().is_empty() {
            return Err(invalid("command is empty"));
        }
        if source.tool_name.trim().is_empty() {
            return Err(invalid("tool_name is empty"));
        }
        if source.query_param_name.trim().is_empty() {
            return Err(invalid("query_param_name is empty"));
        }
        if source.timeout.is_zero() {
            return Err(invalid("timeout_ms must be positive"));
        }
        if !seen.insert(source.name.as_str()) {
            return Err(invalid("duplicate source name"));
        }
    }

    Ok(())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid knowledge source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("No knowledge sources configured")]
    NoSources,
}
