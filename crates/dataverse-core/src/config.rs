use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Top-level configuration for the DataVerse chat client.
///
/// Loaded from `~/.dataverse/config.toml` by default. Every section falls
/// back to its defaults when missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataverseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl DataverseConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DataverseConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.streaming.interval_ms == 0 {
            return Err(CoreError::Config(
                "streaming.interval_ms must be at least 1".to_string(),
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "api.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scheme, host and port of the backend.
    pub base_url: String,
    /// Path of the "generate answer" endpoint.
    pub chat_path: String,
    /// Path of the "execute query" endpoint.
    pub execute_path: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            chat_path: "/chat".to_string(),
            execute_path: "/execute-query".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    /// Full URL of the "generate answer" endpoint.
    pub fn chat_url(&self) -> String {
        join_url(&self.base_url, &self.chat_path)
    }

    /// Full URL of the "execute query" endpoint.
    pub fn execute_url(&self) -> String {
        join_url(&self.base_url, &self.execute_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Progressive reveal tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Milliseconds between reveal ticks.
    pub interval_ms: u64,
    /// Fragment size for the narrative summary (whitespace-aware).
    pub content_chunk_size: usize,
    /// Fragment size for the generated query (line-preserving).
    pub detail_chunk_size: usize,
    /// Fragment size for the result table (line-preserving).
    pub result_chunk_size: usize,
    /// Characters of the question kept as the user message title.
    pub title_max_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            content_chunk_size: 10,
            detail_chunk_size: 10,
            result_chunk_size: 60,
            title_max_chars: 60,
        }
    }
}
