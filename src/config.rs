use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`,
/// with environment overrides applied on top.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub ebay: EbayConfig,
}

/// Bot credentials and channel routing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscordConfig {
    pub token: Option<String>,
    /// Channel whose product alerts are watched.
    pub monitored_channel_id: Option<u64>,
    /// Role pinged for profitable deals.
    pub notify_role_id: Option<u64>,
    /// Where alerts are posted; defaults to the monitored channel.
    pub alert_channel_id: Option<u64>,
}

/// Marketplace sampling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EbayConfig {
    /// Finding API application ID. Without it only the page fallback can run.
    pub app_id: Option<String>,
    #[serde(default = "default_global_id")]
    pub global_id: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Upper bound on a single sampler call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Scrape the sold listings page when the API is missing or failing.
    #[serde(default = "default_page_fallback")]
    pub page_fallback: bool,
}

fn default_global_id() -> String {
    "EBAY-GB".to_string()
}

fn default_max_results() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_page_fallback() -> bool {
    true
}

impl Default for EbayConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            global_id: default_global_id(),
            max_results: default_max_results(),
            timeout_secs: default_timeout_secs(),
            page_fallback: default_page_fallback(),
        }
    }
}

/// Validated runtime settings for the watcher.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub token: String,
    pub monitored_channel_id: u64,
    pub alert_channel_id: u64,
    pub notify_role_id: Option<u64>,
}

fn parse_id(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a numeric Discord ID, got {value:?}"))
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord.token = Some(token);
        }
        if let Some(app_id) = lookup("EBAY_APP_ID") {
            self.ebay.app_id = Some(app_id);
        }
        if let Some(v) = lookup("MONITORED_CHANNEL_ID") {
            self.discord.monitored_channel_id = Some(parse_id("MONITORED_CHANNEL_ID", &v)?);
        }
        if let Some(v) = lookup("PING_ROLE_ID") {
            self.discord.notify_role_id = Some(parse_id("PING_ROLE_ID", &v)?);
        }
        if let Some(v) = lookup("ALERT_CHANNEL_ID") {
            self.discord.alert_channel_id = Some(parse_id("ALERT_CHANNEL_ID", &v)?);
        }
        Ok(())
    }

    /// Check required settings and resolve defaults.
    pub fn watch_settings(&self) -> Result<WatchSettings> {
        let token = self
            .discord
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .context("Discord token not set (DISCORD_TOKEN or [discord].token)")?;
        let monitored_channel_id = self
            .discord
            .monitored_channel_id
            .context("monitored channel not set (MONITORED_CHANNEL_ID or [discord].monitored_channel_id)")?;
        if self.ebay.max_results == 0 {
            anyhow::bail!("[ebay].max_results must be at least 1");
        }
        if self.ebay.timeout_secs == 0 {
            anyhow::bail!("[ebay].timeout_secs must be at least 1");
        }

        Ok(WatchSettings {
            token,
            monitored_channel_id,
            alert_channel_id: self.discord.alert_channel_id.unwrap_or(monitored_channel_id),
            notify_role_id: self.discord.notify_role_id,
        })
    }
}
