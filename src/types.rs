//! Shared types for Wallet Guard.
//!
//! These types form the data model used across all modules: the
//! supported-wallet enumeration, per-wallet version records, alerts,
//! user settings and the domain error enum.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Sentinel used for any version that is not known yet.
pub const NOT_AVAILABLE: &str = "n/a";

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// A wallet extension whose version Wallet Guard tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WalletType {
    MetaMask,
    CoinbaseWallet,
    Phantom,
}

impl WalletType {
    /// Every supported wallet, in canonical iteration order.
    pub const ALL: &'static [WalletType] = &[
        WalletType::MetaMask,
        WalletType::CoinbaseWallet,
        WalletType::Phantom,
    ];

    /// Storage key under which this wallet's record is persisted.
    pub fn key(&self) -> &'static str {
        match self {
            WalletType::MetaMask => "MetaMask",
            WalletType::CoinbaseWallet => "CoinbaseWallet",
            WalletType::Phantom => "Phantom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WalletType::MetaMask => "MetaMask",
            WalletType::CoinbaseWallet => "Coinbase Wallet",
            WalletType::Phantom => "Phantom",
        }
    }

    /// Chrome Web Store extension id.
    pub fn extension_id(&self) -> &'static str {
        match self {
            WalletType::MetaMask => "nkbihfbeogaeaoehlefnkodbefgpgknn",
            WalletType::CoinbaseWallet => "hnfanknocfeofbddgcijnmhnfnkdnaad",
            WalletType::Phantom => "bfnaelmomeimhlpmgjnjophhpkkoljpa",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Parse a wallet identifier (case-insensitive, spaces and dashes ignored).
impl std::str::FromStr for WalletType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        match normalised.as_str() {
            "metamask" => Ok(WalletType::MetaMask),
            "coinbasewallet" | "coinbase" => Ok(WalletType::CoinbaseWallet),
            "phantom" => Ok(WalletType::Phantom),
            _ => Err(anyhow::anyhow!("Unknown wallet type: {s}")),
        }
    }
}

/// Reconciled local/remote version snapshot for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub name: WalletType,
    /// Epoch milliseconds of the last check; 0 means never checked.
    pub last_checked_at: i64,
    pub latest_version: String,
    pub local_version: String,
}

impl WalletInfo {
    /// Record for a wallet that has never been checked.
    pub fn unchecked(name: WalletType) -> Self {
        Self {
            name,
            last_checked_at: 0,
            latest_version: NOT_AVAILABLE.to_string(),
            local_version: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn has_been_checked(&self) -> bool {
        self.last_checked_at > 0
    }

    /// True only when both versions are known and the local one is behind.
    pub fn is_outdated(&self) -> bool {
        is_outdated(&self.local_version, &self.latest_version)
    }
}

/// Compare two dotted version strings component by component.
///
/// Numeric components compare numerically, anything else lexically.
/// Missing trailing components count as zero, so `1.2` == `1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.trim().trim_start_matches('v').split('.').collect();
    let b_parts: Vec<&str> = b.trim().trim_start_matches('v').split('.').collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let x = a_parts.get(i).copied().unwrap_or("0");
        let y = b_parts.get(i).copied().unwrap_or("0");
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Whether `local` is strictly older than `latest`. Unknown versions never are.
pub fn is_outdated(local: &str, latest: &str) -> bool {
    if local == NOT_AVAILABLE || latest == NOT_AVAILABLE || local.is_empty() || latest.is_empty() {
        return false;
    }
    compare_versions(local, latest) == Ordering::Less
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertCategory {
    MaliciousExtension,
    WalletUpdate,
    PhishingWebsite,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::MaliciousExtension => write!(f, "Malicious Extension"),
            AlertCategory::WalletUpdate => write!(f, "Wallet Update"),
            AlertCategory::PhishingWebsite => write!(f, "Phishing Website"),
        }
    }
}

/// An alert raised for the user to review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDetail {
    pub id: String,
    /// Subject of the alert: an extension id, a domain, a wallet key.
    pub key: String,
    pub category: AlertCategory,
    /// Human-readable label, e.g. the extension's display name.
    pub details: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub created_at: i64,
}

impl AlertDetail {
    pub fn new(
        category: AlertCategory,
        key: impl Into<String>,
        details: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            category,
            details: details.into(),
            data,
            created_at: now_millis(),
        }
    }

    pub fn is_malicious_extension(&self) -> bool {
        self.category == AlertCategory::MaliciousExtension
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// User-facing toggles persisted under the `settings` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub wallet_version_notifications: bool,
    pub phishing_detection: bool,
    pub simulation_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wallet_version_notifications: true,
            phishing_detection: true,
            simulation_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for Wallet Guard.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Refresh is cooling down; try again shortly")]
    RefreshCoolingDown,

    #[error("Storage error ({key}): {message}")]
    Storage { key: String, message: String },

    #[error("Version source error ({source_name}): {message}")]
    VersionSource { source_name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
