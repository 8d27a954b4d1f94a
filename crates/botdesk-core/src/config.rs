use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BotdeskError, Result};

/// Environment variable overriding `inference.endpoint`.
pub const ENDPOINT_ENV: &str = "BOTDESK_API_ENDPOINT";
/// Environment variable overriding `inference.api_key`.
pub const API_KEY_ENV: &str = "BOTDESK_API_KEY";

/// Path appended to the configured base URL to reach the chat API.
const CHAT_MESSAGES_PATH: &str = "/chat-messages";

/// Top-level configuration for botdesk.
///
/// Loaded from `~/.botdesk/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotdeskConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl BotdeskConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BotdeskConfig = toml::from_str(&content)?;
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

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BotdeskError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `BOTDESK_API_ENDPOINT` / `BOTDESK_API_KEY` from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        self.inference.apply_overrides(
            std::env::var(ENDPOINT_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        );
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the state database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.botdesk/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Remote inference service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the remote service, without the `/chat-messages` suffix.
    pub endpoint: Option<String>,
    /// Credential given to the default bot on first run.
    pub api_key: Option<String>,
    /// Fixed pseudo identity sent as `user` with every request.
    pub user: String,
    /// Transport timeout in seconds. Expiry is reported as a network failure.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            user: "user-123".to_string(),
            timeout_secs: 120,
        }
    }
}

impl InferenceConfig {
    /// Full URL of the chat endpoint, or `None` when no base URL is set.
    pub fn chat_messages_url(&self) -> Option<String> {
        let base = non_blank(self.endpoint.as_deref())?;
        Some(format!(
            "{}{}",
            base.trim_end_matches('/'),
            CHAT_MESSAGES_PATH
        ))
    }

    /// Default credential, ignoring blank values.
    pub fn default_credential(&self) -> Option<&str> {
        non_blank(self.api_key.as_deref())
    }

    /// Override endpoint and credential. Blank overrides are ignored.
    pub fn apply_overrides(&mut self, endpoint: Option<String>, api_key: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|v| !v.trim().is_empty()) {
            self.endpoint = Some(endpoint);
        }
        if let Some(api_key) = api_key.filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(api_key);
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file name, relative to `general.data_dir`.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "botdesk.db".to_string(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
