//! Wallet version checking.
//!
//! Compares each supported wallet's locally installed version against the
//! latest published one, persists the result as the wallet's record and
//! raises a `WalletUpdate` alert when the user is behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::alerts::AlertHandler;
use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::types::{
    compare_versions, now_millis, AlertCategory, GuardError, Settings, WalletInfo, WalletType,
    NOT_AVAILABLE,
};

/// The external check-and-alert routine the aggregator drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VersionChecker: Send + Sync {
    async fn check_all_wallets_and_create_alerts(&self) -> Result<()>;
}

/// Where the latest published versions come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LatestVersionSource: Send + Sync {
    async fn latest_versions(&self) -> Result<HashMap<WalletType, String>>;
}

/// Where locally installed versions come from. `Ok(None)` = not installed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstalledVersionSource: Send + Sync {
    async fn installed_version(&self, wallet: WalletType) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Latest versions over HTTP
// ---------------------------------------------------------------------------

/// Fetches a JSON object of `{ "<wallet key>": "<version>" }`.
/// Unknown keys are ignored.
pub struct HttpLatestVersions {
    http: Client,
    url: String,
}

impl HttpLatestVersions {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("WalletGuard/0.1.0 (version-check)")
            .build()
            .context("Failed to build HTTP client for version checks")?;

        Ok(Self { http, url })
    }
}

#[async_trait]
impl LatestVersionSource for HttpLatestVersions {
    async fn latest_versions(&self) -> Result<HashMap<WalletType, String>> {
        debug!(url = %self.url, "Fetching latest wallet versions");

        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Latest-version request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GuardError::VersionSource {
                source_name: self.url.clone(),
                message: format!("HTTP {status}: {body}"),
            }
            .into());
        }

        let raw: HashMap<String, String> = resp
            .json()
            .await
            .context("Failed to parse latest-version response")?;

        Ok(parse_version_map(raw))
    }
}

fn parse_version_map(raw: HashMap<String, String>) -> HashMap<WalletType, String> {
    raw.into_iter()
        .filter_map(|(k, v)| match k.parse::<WalletType>() {
            Ok(wallet) => Some((wallet, v)),
            Err(_) => {
                debug!(key = %k, "Ignoring unknown wallet in latest-version response");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Installed versions
// ---------------------------------------------------------------------------

/// Reads a Chromium profile's `Extensions` directory:
/// `<root>/<extension id>/<version>_<n>/manifest.json`.
/// When several version directories exist the highest manifest version wins.
pub struct ExtensionDirVersions {
    root: PathBuf,
}

#[derive(Deserialize)]
struct Manifest {
    version: String,
}

impl ExtensionDirVersions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl InstalledVersionSource for ExtensionDirVersions {
    async fn installed_version(&self, wallet: WalletType) -> Result<Option<String>> {
        let ext_dir = self.root.join(wallet.extension_id());
        if !tokio::fs::try_exists(&ext_dir).await.unwrap_or(false) {
            return Ok(None);
        }

        let mut entries = tokio::fs::read_dir(&ext_dir)
            .await
            .with_context(|| format!("Failed to list {}", ext_dir.display()))?;

        let mut best: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            let manifest_path = entry.path().join("manifest.json");
            let Ok(json) = tokio::fs::read_to_string(&manifest_path).await else {
                continue;
            };
            let manifest: Manifest = match serde_json::from_str(&json) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "Unreadable extension manifest");
                    continue;
                }
            };
            let newer = best
                .as_deref()
                .map_or(true, |b| compare_versions(&manifest.version, b).is_gt());
            if newer {
                best = Some(manifest.version);
            }
        }

        Ok(best)
    }
}

/// Fixed versions, e.g. from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticInstalledVersions {
    versions: HashMap<WalletType, String>,
}

impl StaticInstalledVersions {
    pub fn new(versions: HashMap<WalletType, String>) -> Self {
        Self { versions }
    }
}

#[async_trait]
impl InstalledVersionSource for StaticInstalledVersions {
    async fn installed_version(&self, wallet: WalletType) -> Result<Option<String>> {
        Ok(self.versions.get(&wallet).cloned())
    }
}

// ---------------------------------------------------------------------------
// Version service
// ---------------------------------------------------------------------------

pub struct VersionService {
    store: Arc<dyn KeyValueStore>,
    alerts: Arc<AlertHandler>,
    latest: Arc<dyn LatestVersionSource>,
    installed: Arc<dyn InstalledVersionSource>,
    wallets: Vec<WalletType>,
}

impl VersionService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        alerts: Arc<AlertHandler>,
        latest: Arc<dyn LatestVersionSource>,
        installed: Arc<dyn InstalledVersionSource>,
        wallets: Vec<WalletType>,
    ) -> Self {
        Self {
            store,
            alerts,
            latest,
            installed,
            wallets,
        }
    }

    /// Check one wallet, persist its record and alert if needed.
    /// Returns the fresh record and whether an alert was raised.
    async fn check_wallet(
        &self,
        wallet: WalletType,
        latest: &HashMap<WalletType, String>,
        settings: &Settings,
    ) -> Result<(WalletInfo, bool)> {
        let previous: Option<WalletInfo> = read_json(self.store.as_ref(), wallet.key())
            .await
            .unwrap_or_else(|e| {
                warn!(wallet = %wallet, error = %e, "Discarding unreadable wallet record");
                None
            });

        let local_version = match self.installed.installed_version(wallet).await {
            Ok(v) => v.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            Err(e) => {
                warn!(wallet = %wallet, error = %e, "Installed version lookup failed");
                NOT_AVAILABLE.to_string()
            }
        };

        let record = WalletInfo {
            name: wallet,
            last_checked_at: now_millis(),
            latest_version: latest
                .get(&wallet)
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            local_version,
        };

        let already_reported = previous.as_ref().is_some_and(|p| {
            p.is_outdated()
                && p.latest_version == record.latest_version
                && p.local_version == record.local_version
        });

        let alert = record.is_outdated() && settings.wallet_version_notifications && !already_reported;
        if alert {
            self.alerts
                .create_alert(
                    AlertCategory::WalletUpdate,
                    wallet.key(),
                    wallet.display_name(),
                    serde_json::json!({
                        "localVersion": record.local_version,
                        "latestVersion": record.latest_version,
                        "extensionId": wallet.extension_id(),
                    }),
                )
                .await?;
        }
        // Saved only after the alert, so a failed alert is retried next check.
        write_json(self.store.as_ref(), wallet.key(), &record).await?;

        debug!(
            wallet = %wallet,
            local = %record.local_version,
            latest = %record.latest_version,
            outdated = record.is_outdated(),
            "Wallet checked"
        );
        Ok((record, alert))
    }
}

#[async_trait]
impl VersionChecker for VersionService {
    async fn check_all_wallets_and_create_alerts(&self) -> Result<()> {
        let latest = self.latest.latest_versions().await?;
        let settings: Settings = read_json(self.store.as_ref(), keys::SETTINGS)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable settings, using defaults");
                None
            })
            .unwrap_or_default();

        let mut outdated = 0usize;
        let mut alerts = 0usize;
        for wallet in &self.wallets {
            let (record, alerted) = self.check_wallet(*wallet, &latest, &settings).await?;
            if record.is_outdated() {
                outdated += 1;
            }
            if alerted {
                alerts += 1;
            }
        }

        info!(
            wallets = self.wallets.len(),
            outdated,
            alerts,
            "Wallet version check complete"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
