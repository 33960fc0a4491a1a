//! Router configuration.

use crate::channel::{default_user_channels, Channel, ChannelType};
use crate::core::{Error, Result, DEFAULT_CHANNEL};
use crate::monitoring::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default wait for a launched app to become ready and listen.
pub const DEFAULT_LAUNCH_TIMEOUT_MS: u64 = 20_000;

/// Default wait for an intent handler's result.
pub const DEFAULT_RESULT_TIMEOUT_MS: u64 = 20_000;

/// Identity reported by `getInfo`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Provider version
    pub provider_version: String,
    /// Supported FDC3 version
    pub fdc3_version: String,
}

impl Default for ProviderInfo {
    fn default() -> Self {
        Self {
            provider: env!("CARGO_PKG_NAME").to_string(),
            provider_version: env!("CARGO_PKG_VERSION").to_string(),
            fdc3_version: "2.0".to_string(),
        }
    }
}

/// Message router configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// User channels offered to apps, in display order
    pub user_channels: Vec<Channel>,
    /// System channels (joinable like user channels, not listed to apps)
    pub system_channels: Vec<Channel>,
    /// Wait for a launched app to become ready and add the listener
    pub launch_timeout_ms: u64,
    /// Wait for an intent handler's result
    pub result_timeout_ms: u64,
    /// Hand the latest context to current-channel listeners on join
    pub deliver_context_on_join: bool,
    /// Identity reported by `getInfo`
    pub provider: ProviderInfo,
    /// Logging setup
    pub logging: LoggingConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            user_channels: default_user_channels(),
            system_channels: Vec::new(),
            launch_timeout_ms: DEFAULT_LAUNCH_TIMEOUT_MS,
            result_timeout_ms: DEFAULT_RESULT_TIMEOUT_MS,
            deliver_context_on_join: true,
            provider: ProviderInfo::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Parse from JSON; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid(format!("cannot read config {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Set the launch timeout.
    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the result timeout.
    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Add a system channel.
    pub fn with_system_channel(mut self, id: &str) -> Self {
        self.system_channels.push(Channel::new(id, ChannelType::System));
        self
    }

    /// Launch wait as a duration.
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    /// Result wait as a duration.
    pub fn result_timeout(&self) -> Duration {
        Duration::from_millis(self.result_timeout_ms)
    }

    /// User and system channels together, user channels first.
    pub fn fixed_channels(&self) -> Vec<Channel> {
        self.user_channels
            .iter()
            .chain(&self.system_channels)
            .cloned()
            .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.launch_timeout_ms == 0 || self.result_timeout_ms == 0 {
            return Err(Error::invalid("timeouts must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for channel in self.user_channels.iter().chain(&self.system_channels) {
            if channel.id == DEFAULT_CHANNEL || channel.id.is_empty() {
                return Err(Error::invalid(format!("reserved channel id '{}'", channel.id)));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(Error::invalid(format!("duplicate channel id {}", channel.id)));
            }
        }
        for channel in &self.user_channels {
            if channel.channel_type != ChannelType::User {
                return Err(Error::invalid(format!("{} is listed as a user channel", channel.id)));
            }
        }
        for channel in &self.system_channels {
            if channel.channel_type != ChannelType::System {
                return Err(Error::invalid(format!("{} is listed as a system channel", channel.id)));
            }
        }
        Ok(())
    }
}
