//! Dashboard session: what happens when a user opens the dashboard.
//!
//! Publishes wallet records, does notification housekeeping, drains
//! unread alerts and reports telemetry. Housekeeping and telemetry are
//! best-effort; only the record load and alert reads can fail the visit.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{partition_alerts, AlertHandler};
use crate::engine::aggregator::WalletStatusAggregator;
use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::telemetry::{Telemetry, EVENT_MALICIOUS_EXTENSION_DISABLED, EVENT_VISIT_DASHBOARD};
use crate::types::{AlertDetail, Settings, WalletInfo};

/// How many alerts the dashboard's "recent" list shows.
pub const RECENT_ALERTS_LIMIT: usize = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub records: Vec<WalletInfo>,
    pub recent_alerts: Vec<AlertDetail>,
    pub unread_alerts: Vec<AlertDetail>,
    pub settings: Settings,
}

impl DashboardOverview {
    /// The dashboard is in good standing when nothing is unread.
    pub fn in_good_standing(&self) -> bool {
        self.unread_alerts.is_empty()
    }
}

pub struct DashboardSession {
    aggregator: Arc<WalletStatusAggregator>,
    alerts: Arc<AlertHandler>,
    store: Arc<dyn KeyValueStore>,
    telemetry: Telemetry,
}

impl DashboardSession {
    pub fn new(
        aggregator: Arc<WalletStatusAggregator>,
        alerts: Arc<AlertHandler>,
        store: Arc<dyn KeyValueStore>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            aggregator,
            alerts,
            store,
            telemetry,
        }
    }

    pub fn aggregator(&self) -> &Arc<WalletStatusAggregator> {
        &self.aggregator
    }

    pub fn alerts(&self) -> &Arc<AlertHandler> {
        &self.alerts
    }

    pub async fn activate(&self) -> Result<DashboardOverview> {
        let records = self.aggregator.reload().await?;

        if let Err(e) = self.alerts.clear_notifications().await {
            warn!(error = %e, "Failed to clear notifications");
        }

        let mut history = self.alerts.get_all_alerts().await?;
        history.sort_by(crate::alerts::sort_by_created_at);
        history.truncate(RECENT_ALERTS_LIMIT);

        let unread = self.alerts.remove_all_unread_alerts().await?;
        self.telemetry.capture(
            EVENT_VISIT_DASHBOARD,
            serde_json::json!({ "alertsCount": unread.len() }),
        );
        let reported = report_malicious_extensions(&unread, &self.telemetry);

        let settings = self.settings().await;

        info!(
            wallets = records.len(),
            unread = unread.len(),
            malicious = reported,
            "Dashboard activated"
        );

        Ok(DashboardOverview {
            records,
            recent_alerts: history,
            unread_alerts: unread,
            settings,
        })
    }

    /// Stored settings, or defaults when missing or unreadable.
    pub async fn settings(&self) -> Settings {
        match read_json::<Settings>(self.store.as_ref(), keys::SETTINGS).await {
            Ok(Some(s)) => s,
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!(error = %e, "Unreadable settings, using defaults");
                Settings::default()
            }
        }
    }

    /// Flip wallet-version notifications and persist.
    pub async fn toggle_notifications(&self) -> Result<Settings> {
        let mut settings = self.settings().await;
        settings.wallet_version_notifications = !settings.wallet_version_notifications;
        write_json(self.store.as_ref(), keys::SETTINGS, &settings).await?;

        info!(
            enabled = settings.wallet_version_notifications,
            "Wallet version notifications toggled"
        );
        Ok(settings)
    }
}

/// Emit one telemetry event per malicious-extension alert. Returns how many.
pub fn report_malicious_extensions(alerts: &[AlertDetail], telemetry: &Telemetry) -> usize {
    let (malicious, _) = partition_alerts(alerts);
    for ext in &malicious {
        telemetry.capture(
            EVENT_MALICIOUS_EXTENSION_DISABLED,
            serde_json::json!({
                "extensionId": ext.key,
                "name": ext.details,
                "data": ext.data,
            }),
        );
    }
    malicious.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
