//! ConfigStore - Bot Configuration Persistence
//!
//! Small key-value record read at startup and rewritable at runtime. The
//! storage medium (a JSON file) is a collaborator concern; a missing or
//! unreadable file degrades to defaults rather than failing startup.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Telegram bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: true,
        }
    }
}

impl BotConfig {
    /// Both the token and the authorized chat must be set before the
    /// command listener may run
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// JSON-file-backed configuration store
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the stored configuration, falling back to defaults on a missing
    /// or malformed file
    pub async fn load(&self) -> BotConfig {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Malformed bot config, using defaults");
                    BotConfig::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No bot config file, using defaults");
                BotConfig::default()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read bot config, using defaults");
                BotConfig::default()
            }
        }
    }

    pub async fn save(&self, config: &BotConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, json).await?;
        tracing::info!(path = %self.path.display(), "Bot config saved");
        Ok(())
    }
}
