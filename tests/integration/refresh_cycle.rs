//! End-to-end refresh cycle.
//!
//! Wires a file-backed store, the real version service, alert handler,
//! aggregator and dashboard session together with mock version sources,
//! then drives dashboard visits and refreshes the way the UI would.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use walletguard::alerts::AlertHandler;
use walletguard::engine::aggregator::WalletStatusAggregator;
use walletguard::engine::session::DashboardSession;
use walletguard::engine::version_check::VersionService;
use walletguard::storage::{write_json, JsonFileStore, KeyValueStore};
use walletguard::telemetry::{Telemetry, EVENT_MALICIOUS_EXTENSION_DISABLED, EVENT_VISIT_DASHBOARD};
use walletguard::types::{AlertCategory, GuardError, WalletInfo, WalletType};

use crate::mock_sources::{MockFeed, MockInstalled, RecordingSink};

const COOLDOWN: Duration = Duration::from_millis(50);

struct Harness {
    path: PathBuf,
    store: Arc<dyn KeyValueStore>,
    aggregator: Arc<WalletStatusAggregator>,
    session: DashboardSession,
    feed: MockFeed,
    installed: MockInstalled,
    sink: RecordingSink,
}

impl Harness {
    async fn new(wallets: &[WalletType], feed: MockFeed, installed: MockInstalled) -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("walletguard_it_{}.json", uuid::Uuid::new_v4()));
        Self::open(path, wallets, feed, installed).await
    }

    async fn open(
        path: PathBuf,
        wallets: &[WalletType],
        feed: MockFeed,
        installed: MockInstalled,
    ) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let alerts = Arc::new(AlertHandler::new(store.clone()));
        let checker = Arc::new(VersionService::new(
            store.clone(),
            alerts.clone(),
            Arc::new(feed.clone()),
            Arc::new(installed.clone()),
            wallets.to_vec(),
        ));
        let aggregator = Arc::new(
            WalletStatusAggregator::new(store.clone(), checker, wallets.to_vec())
                .with_cooldown(COOLDOWN),
        );
        let sink = RecordingSink::default();
        let (telemetry, _dispatcher) = Telemetry::spawn(Arc::new(sink.clone()));
        let session = DashboardSession::new(aggregator.clone(), alerts, store.clone(), telemetry);

        Self {
            path,
            store,
            aggregator,
            session,
            feed,
            installed,
            sink,
        }
    }

    async fn wait_for_cooldown(&self) {
        self.aggregator
            .subscribe()
            .wait_for(|s| s.can_refresh)
            .await
            .unwrap();
    }

    /// Telemetry is delivered asynchronously; give the dispatcher a moment.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn record(name: WalletType, at: i64, latest: &str, local: &str) -> WalletInfo {
    WalletInfo {
        name,
        last_checked_at: at,
        latest_version: latest.into(),
        local_version: local.into(),
    }
}

#[tokio::test]
async fn test_partial_store_scenario() {
    let h = Harness::new(
        &[WalletType::MetaMask, WalletType::Phantom],
        MockFeed::default(),
        MockInstalled::default(),
    )
    .await;
    write_json(h.store.as_ref(), "MetaMask", &record(WalletType::MetaMask, 100, "2.0", "1.9"))
        .await
        .unwrap();

    let overview = h.session.activate().await.unwrap();
    assert_eq!(
        overview.records,
        vec![
            record(WalletType::MetaMask, 100, "2.0", "1.9"),
            record(WalletType::Phantom, 0, "n/a", "n/a"),
        ]
    );
    assert_eq!(h.aggregator.records(), overview.records);
    assert!(overview.in_good_standing());

    h.cleanup();
}

#[tokio::test]
async fn test_refresh_detects_outdated_wallet_and_alerts_once() {
    let h = Harness::new(
        &[WalletType::MetaMask, WalletType::Phantom],
        MockFeed::with(&[(WalletType::MetaMask, "11.2.0"), (WalletType::Phantom, "23.4.1")]),
        MockInstalled::with(&[(WalletType::MetaMask, "11.1.3"), (WalletType::Phantom, "23.4.1")]),
    )
    .await;

    let records = h.aggregator.refresh().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_outdated());
    assert!(!records[1].is_outdated());
    assert!(records.iter().all(|r| r.has_been_checked()));
    assert!(!h.aggregator.is_loading());

    let overview = h.session.activate().await.unwrap();
    assert_eq!(overview.unread_alerts.len(), 1);
    assert_eq!(overview.unread_alerts[0].category, AlertCategory::WalletUpdate);
    assert_eq!(overview.unread_alerts[0].key, "MetaMask");

    // Same versions again: no duplicate alert.
    h.wait_for_cooldown().await;
    h.aggregator.refresh().await.unwrap();
    let again = h.session.activate().await.unwrap();
    assert!(again.unread_alerts.is_empty());
    assert_eq!(again.recent_alerts.len(), 1);

    h.settle().await;
    assert_eq!(h.sink.count(EVENT_VISIT_DASHBOARD), 2);
    h.cleanup();
}

#[tokio::test]
async fn test_user_updates_wallet() {
    let h = Harness::new(
        &[WalletType::Phantom],
        MockFeed::with(&[(WalletType::Phantom, "23.4.1")]),
        MockInstalled::with(&[(WalletType::Phantom, "23.3.0")]),
    )
    .await;

    assert!(h.aggregator.refresh().await.unwrap()[0].is_outdated());

    h.installed.install(WalletType::Phantom, "23.4.1");
    h.wait_for_cooldown().await;
    let records = h.aggregator.refresh().await.unwrap();
    assert_eq!(records[0].local_version, "23.4.1");
    assert!(!records[0].is_outdated());

    // A new release makes it outdated again, and alerts again.
    h.feed.publish(WalletType::Phantom, "23.5.0");
    h.wait_for_cooldown().await;
    assert!(h.aggregator.refresh().await.unwrap()[0].is_outdated());

    let unread = h.session.alerts().remove_all_unread_alerts().await.unwrap();
    assert_eq!(unread.len(), 2);
    h.cleanup();
}

#[tokio::test]
async fn test_feed_failure_then_recovery() {
    let h = Harness::new(
        &[WalletType::MetaMask],
        MockFeed::with(&[(WalletType::MetaMask, "11.2.0")]),
        MockInstalled::with(&[(WalletType::MetaMask, "11.2.0")]),
    )
    .await;
    h.aggregator.reload().await.unwrap();
    let before = h.aggregator.records();

    h.feed.set_error("feed unavailable");
    assert!(h.aggregator.refresh().await.is_err());
    assert!(!h.aggregator.is_loading());
    assert_eq!(h.aggregator.records(), before);

    // Still cooling down: the check is not attempted again.
    let err = h.aggregator.refresh().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<GuardError>(), Some(GuardError::RefreshCoolingDown)));
    assert_eq!(h.feed.calls(), 1);

    h.feed.clear_error();
    h.wait_for_cooldown().await;
    let records = h.aggregator.refresh().await.unwrap();
    assert_eq!(records[0].latest_version, "11.2.0");
    assert_eq!(h.feed.calls(), 2);
    h.cleanup();
}

#[tokio::test]
async fn test_records_survive_restart() {
    let feed = MockFeed::with(&[(WalletType::MetaMask, "11.2.0")]);
    let installed = MockInstalled::with(&[(WalletType::MetaMask, "11.0.0")]);
    let wallets = WalletType::ALL;

    let first = Harness::new(wallets, feed.clone(), installed.clone()).await;
    let published = first.aggregator.refresh().await.unwrap();
    let path = first.path.clone();
    drop(first);

    let second = Harness::open(path, wallets, feed, installed).await;
    let loaded = second.aggregator.load_records().await.unwrap();
    assert_eq!(loaded, published);
    assert_eq!(loaded.len(), WalletType::ALL.len());
    assert_eq!(second.session.alerts().get_all_alerts().await.unwrap().len(), 1);
    second.cleanup();
}

#[tokio::test]
async fn test_malicious_extension_telemetry() {
    let h = Harness::new(&[WalletType::MetaMask], MockFeed::default(), MockInstalled::default()).await;
    let alerts = h.session.alerts();
    alerts
        .create_alert(AlertCategory::MaliciousExtension, "aaaabbbbcccc", "Fake MetaMask", json!({"risk": "drainer"}))
        .await
        .unwrap();
    alerts
        .create_alert(AlertCategory::PhishingWebsite, "metamask-support.xyz", "metamask-support.xyz", json!(null))
        .await
        .unwrap();
    alerts
        .create_alert(AlertCategory::MaliciousExtension, "ddddeeeeffff", "Phantom Helper", json!({"risk": "keylogger"}))
        .await
        .unwrap();

    let overview = h.session.activate().await.unwrap();
    assert_eq!(overview.unread_alerts.len(), 3);

    h.settle().await;
    assert_eq!(h.sink.count(EVENT_MALICIOUS_EXTENSION_DISABLED), 2);
    let events = h.sink.events();
    let ids: Vec<_> = events
        .iter()
        .filter(|e| e.event == EVENT_MALICIOUS_EXTENSION_DISABLED)
        .map(|e| e.properties["extensionId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["aaaabbbbcccc", "ddddeeeeffff"]);
    let visit = events.iter().find(|e| e.event == EVENT_VISIT_DASHBOARD).unwrap();
    assert_eq!(visit.properties["alertsCount"], 3);
    h.cleanup();
}
