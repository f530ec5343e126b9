//! # Configuration Management Module
//!
//! TOML configuration for the bot, loaded once at startup.
//!
//! ## Configuration Structure
//!
//! - [`MeshtasticConfig`] - how to reach the radio
//! - [`BotConfig`] - plugin directory and conversation behaviour
//! - [`LoggingConfig`] - log level, log file and raw frame capture
//!
//! Every section and field has a default, so an empty file is a valid configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshbot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Plugins from: {}", config.bot.plugin_dir);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [meshtastic]
//! port = "/dev/ttyUSB0"      # omit (and omit host) to auto-detect a serial port
//! # host = "meshtastic.local"  # TCP instead of serial; port 4403 unless given
//! baud_rate = 115200
//! heartbeat_interval_secs = 300
//! wake_device = true
//!
//! [bot]
//! plugin_dir = "plugins"
//! reply_timeout_secs = 30
//! conversation_scope = "global"  # or "per_node"
//!
//! [logging]
//! level = "info"
//! file = "meshbot.log"
//! # frame_log = "frames.log"
//! ```

use crate::bot::ConversationScope;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshtasticConfig {
    /// Serial device path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Network-attached radio; takes precedence over `port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub baud_rate: u32,
    /// 0 disables the heartbeat.
    pub heartbeat_interval_secs: u64,
    pub wake_device: bool,
}

impl MeshtasticConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

impl Default for MeshtasticConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: None,
            baud_rate: 115200,
            heartbeat_interval_secs: 300,
            wake_device: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub plugin_dir: String,
    /// Default wait for `reply_blocking` when a plugin does not pass one.
    pub reply_timeout_secs: u64,
    pub conversation_scope: ConversationScope,
}

impl BotConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs.max(1))
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            plugin_dir: "plugins".to_string(),
            reply_timeout_secs: 30,
            conversation_scope: ConversationScope::Global,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Append every raw frame (hex) to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_log: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("meshbot.log".to_string()),
            frame_log: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}
