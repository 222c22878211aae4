//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the telemetry API key) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::types::{GuardError, WalletType};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub guard: GuardConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub versions: VersionsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardConfig {
    pub name: String,
    /// Wallets to track, in display order. Empty means all supported.
    #[serde(default)]
    pub supported_wallets: Vec<WalletType>,
    #[serde(default = "default_cooldown_ms")]
    pub refresh_cooldown_ms: u64,
    /// Automatic refresh period; unset disables background polling.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

fn default_cooldown_ms() -> u64 {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: crate::storage::DEFAULT_STORE_FILE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VersionsConfig {
    pub latest_versions_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Chromium profile `Extensions` directory to read installed versions from.
    #[serde(default)]
    pub extensions_dir: Option<String>,
    /// Fixed installed versions, used when `extensions_dir` is unset.
    #[serde(default)]
    pub installed: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Capture endpoint; without it events only go to the log.
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    pub distinct_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8734,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.guard.refresh_cooldown_ms == 0 {
            return Err(GuardError::Config("guard.refresh_cooldown_ms must be positive".into()).into());
        }
        if self.guard.poll_interval_secs == Some(0) {
            return Err(GuardError::Config("guard.poll_interval_secs must be positive".into()).into());
        }
        for key in self.versions.installed.keys() {
            key.parse::<WalletType>()
                .map_err(|e| GuardError::Config(format!("versions.installed: {e}")))?;
        }
        Ok(())
    }

    /// The configured wallet set, or every supported wallet.
    /// Duplicates are dropped, first occurrence wins.
    pub fn wallets(&self) -> Vec<WalletType> {
        if self.guard.supported_wallets.is_empty() {
            return WalletType::ALL.to_vec();
        }
        let mut out = Vec::new();
        for w in &self.guard.supported_wallets {
            if !out.contains(w) {
                out.push(*w);
            }
        }
        out
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::from_millis(self.guard.refresh_cooldown_ms)
    }

    pub fn installed_versions(&self) -> HashMap<WalletType, String> {
        self.versions
            .installed
            .iter()
            .filter_map(|(k, v)| k.parse::<WalletType>().ok().map(|w| (w, v.clone())))
            .collect()
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
