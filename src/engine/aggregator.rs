//! Wallet status aggregation.
//!
//! Owns the published wallet-record list and the two refresh flags.
//! Records are rebuilt wholesale from storage on every load; the
//! refresh cool-down and the loading flag run on independent clocks.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::version_check::VersionChecker;
use crate::storage::KeyValueStore;
use crate::types::{GuardError, WalletInfo, WalletType};

pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_millis(4000);

/// What callers observe. Every field changes only through the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Empty until the first load completes.
    pub records: Vec<WalletInfo>,
    pub loading: bool,
    pub can_refresh: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: false,
            can_refresh: true,
        }
    }
}

pub struct WalletStatusAggregator {
    store: Arc<dyn KeyValueStore>,
    checker: Arc<dyn VersionChecker>,
    wallets: Vec<WalletType>,
    cooldown: Duration,
    state: Arc<watch::Sender<StatusSnapshot>>,
}

impl WalletStatusAggregator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        checker: Arc<dyn VersionChecker>,
        wallets: Vec<WalletType>,
    ) -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            store,
            checker,
            wallets,
            cooldown: DEFAULT_REFRESH_COOLDOWN,
            state: Arc::new(tx),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.borrow().clone()
    }

    pub fn records(&self) -> Vec<WalletInfo> {
        self.state.borrow().records.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn can_refresh(&self) -> bool {
        self.state.borrow().can_refresh
    }

    /// Read one record per supported wallet, in enumeration order.
    ///
    /// All reads are issued together and joined. Missing or undecodable
    /// entries become default records; a storage failure on any key fails
    /// the whole load. Nothing is published here.
    pub async fn load_records(&self) -> Result<Vec<WalletInfo>> {
        let reads = self.wallets.iter().map(|w| self.store.get(w.key()));
        let results = join_all(reads).await;

        let mut records = Vec::with_capacity(self.wallets.len());
        for (wallet, result) in self.wallets.iter().zip(results) {
            let raw = result.with_context(|| format!("Failed to read record for {wallet}"))?;
            records.push(reconcile(*wallet, raw));
        }
        Ok(records)
    }

    /// Load and publish in one step.
    pub async fn reload(&self) -> Result<Vec<WalletInfo>> {
        let records = self.load_records().await?;
        self.state.send_modify(|s| s.records = records.clone());
        debug!(count = records.len(), "Wallet records published");
        Ok(records)
    }

    /// Run the external check, then reload and publish.
    ///
    /// Fails with [`GuardError::RefreshCoolingDown`] while a previous
    /// refresh's cool-down is active; in that case nothing else happens.
    /// The cool-down always lasts `cooldown` from this call, whatever the
    /// check does. Loading is cleared on every exit path.
    pub async fn refresh(&self) -> Result<Vec<WalletInfo>> {
        let Some(loading) = LoadingGuard::acquire(&self.state) else {
            warn!("Refresh requested during cool-down, ignoring");
            return Err(GuardError::RefreshCoolingDown.into());
        };

        let release_at = Instant::now() + self.cooldown;
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(release_at).await;
            state.send_modify(|s| s.can_refresh = true);
            debug!("Refresh cool-down elapsed");
        });

        info!(wallets = self.wallets.len(), "Refreshing wallet versions");

        self.checker
            .check_all_wallets_and_create_alerts()
            .await
            .context("Wallet version check failed")?;

        let records = self.load_records().await?;
        loading.finish(records.clone());

        info!(
            outdated = records.iter().filter(|r| r.is_outdated()).count(),
            "Wallet refresh complete"
        );
        Ok(records)
    }
}

/// Turn one raw stored entry into a record for `wallet`.
fn reconcile(wallet: WalletType, raw: Option<serde_json::Value>) -> WalletInfo {
    let Some(value) = raw else {
        return WalletInfo::unchecked(wallet);
    };

    match serde_json::from_value::<WalletInfo>(value) {
        Ok(mut info) => {
            if info.name != wallet {
                warn!(key = wallet.key(), stored = %info.name, "Stored record name mismatch, using key");
                info.name = wallet;
            }
            info
        }
        Err(e) => {
            warn!(key = wallet.key(), error = %e, "Unreadable wallet record, using default");
            WalletInfo::unchecked(wallet)
        }
    }
}

/// Claim a refresh: clears can-refresh and sets loading in one update.
/// Returns false, leaving the snapshot untouched, while cooling down.
fn begin_refresh(s: &mut StatusSnapshot) -> bool {
    if !s.can_refresh {
        return false;
    }
    s.can_refresh = false;
    s.loading = true;
    true
}

/// Holds `loading` for one refresh. `finish` publishes the new records and
/// clears it atomically; dropping without `finish` just clears it.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<StatusSnapshot>,
    finished: bool,
}

impl<'a> LoadingGuard<'a> {
    fn acquire(state: &'a watch::Sender<StatusSnapshot>) -> Option<Self> {
        state.send_if_modified(begin_refresh).then(|| Self {
            state,
            finished: false,
        })
    }

    fn finish(mut self, records: Vec<WalletInfo>) {
        self.state.send_modify(|s| {
            s.records = records;
            s.loading = false;
        });
        self.finished = true;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Refresh did not complete, clearing loading flag");
            self.state.send_modify(|s| s.loading = false);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
