//! Mock version sources and telemetry sink for integration testing.
//!
//! Deterministic, in-memory stand-ins for the HTTP latest-version feed,
//! the installed-extension lookup and the telemetry endpoint. All state
//! is controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use walletguard::engine::version_check::{InstalledVersionSource, LatestVersionSource};
use walletguard::telemetry::{TelemetryEvent, TelemetrySink};
use walletguard::types::WalletType;

/// Published versions, changeable mid-test.
#[derive(Clone, Default)]
pub struct MockFeed {
    versions: Arc<Mutex<HashMap<WalletType, String>>>,
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockFeed {
    pub fn with(versions: &[(WalletType, &str)]) -> Self {
        let feed = Self::default();
        for (w, v) in versions {
            feed.publish(*w, v);
        }
        feed
    }

    pub fn publish(&self, wallet: WalletType, version: &str) {
        self.versions.lock().unwrap().insert(wallet, version.to_string());
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LatestVersionSource for MockFeed {
    async fn latest_versions(&self) -> Result<HashMap<WalletType, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(self.versions.lock().unwrap().clone())
    }
}

/// Installed versions, changeable mid-test (simulates the user updating).
#[derive(Clone, Default)]
pub struct MockInstalled {
    versions: Arc<Mutex<HashMap<WalletType, String>>>,
}

impl MockInstalled {
    pub fn with(versions: &[(WalletType, &str)]) -> Self {
        let installed = Self::default();
        for (w, v) in versions {
            installed.install(*w, v);
        }
        installed
    }

    pub fn install(&self, wallet: WalletType, version: &str) {
        self.versions.lock().unwrap().insert(wallet, version.to_string());
    }
}

#[async_trait]
impl InstalledVersionSource for MockInstalled {
    async fn installed_version(&self, wallet: WalletType) -> Result<Option<String>> {
        Ok(self.versions.lock().unwrap().get(&wallet).cloned())
    }
}

/// Records every event it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| e.event == name).count()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&self, event: &TelemetryEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
