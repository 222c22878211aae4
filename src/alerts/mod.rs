//! Alert bookkeeping.
//!
//! Alerts live in three stored lists: the full history, the unread
//! queue the dashboard drains on visit, and pending notification ids
//! (the badge count). All three are read-modify-write under one lock
//! so concurrent producers cannot lose updates.

use anyhow::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::types::{AlertCategory, AlertDetail};

/// Newest first.
pub fn sort_by_created_at(a: &AlertDetail, b: &AlertDetail) -> Ordering {
    b.created_at.cmp(&a.created_at)
}

/// Split alerts into (malicious-extension, everything else), preserving order.
pub fn partition_alerts(alerts: &[AlertDetail]) -> (Vec<&AlertDetail>, Vec<&AlertDetail>) {
    alerts.iter().partition(|a| a.is_malicious_extension())
}

pub struct AlertHandler {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl AlertHandler {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a new alert in the unread queue, the pending notifications
    /// and the history. The history is written last; if any write fails the
    /// lists already written are restored, so a failed call leaves no trace.
    pub async fn create_alert(
        &self,
        category: AlertCategory,
        key: &str,
        details: &str,
        data: serde_json::Value,
    ) -> Result<AlertDetail> {
        let alert = AlertDetail::new(category, key, details, data);
        let _guard = self.write_lock.lock().await;

        let history = self.load_list(keys::ALERT_HISTORY).await?;
        let unread = self.load_list(keys::UNREAD_ALERTS).await?;
        let pending: Vec<String> = read_json(self.store.as_ref(), keys::NOTIFICATIONS)
            .await?
            .unwrap_or_default();

        let mut next_unread = unread.clone();
        next_unread.push(alert.clone());
        write_json(self.store.as_ref(), keys::UNREAD_ALERTS, &next_unread).await?;

        let mut next_pending = pending.clone();
        next_pending.push(alert.id.clone());
        if let Err(e) = write_json(self.store.as_ref(), keys::NOTIFICATIONS, &next_pending).await {
            self.restore(keys::UNREAD_ALERTS, &unread).await;
            return Err(e);
        }

        let mut next_history = history;
        next_history.push(alert.clone());
        if let Err(e) = write_json(self.store.as_ref(), keys::ALERT_HISTORY, &next_history).await {
            self.restore(keys::UNREAD_ALERTS, &unread).await;
            self.restore(keys::NOTIFICATIONS, &pending).await;
            return Err(e);
        }

        info!(
            category = %alert.category,
            key = %alert.key,
            details = %alert.details,
            "Alert created"
        );
        Ok(alert)
    }

    async fn restore<T: serde::Serialize>(&self, key: &str, previous: &T) {
        if let Err(e) = write_json(self.store.as_ref(), key, previous).await {
            warn!(key, error = %e, "Failed to roll back alert list");
        }
    }

    pub async fn get_all_alerts(&self) -> Result<Vec<AlertDetail>> {
        self.load_list(keys::ALERT_HISTORY).await
    }

    /// Return every unread alert and mark them all read.
    pub async fn remove_all_unread_alerts(&self) -> Result<Vec<AlertDetail>> {
        let _guard = self.write_lock.lock().await;
        let unread = self.load_list(keys::UNREAD_ALERTS).await?;
        if !unread.is_empty() {
            write_json(self.store.as_ref(), keys::UNREAD_ALERTS, &Vec::<AlertDetail>::new()).await?;
        }
        debug!(count = unread.len(), "Unread alerts drained");
        Ok(unread)
    }

    /// Drop all pending notifications. Returns how many were cleared.
    pub async fn clear_notifications(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let pending: Vec<String> = read_json(self.store.as_ref(), keys::NOTIFICATIONS)
            .await?
            .unwrap_or_default();
        if !pending.is_empty() {
            self.store.remove(keys::NOTIFICATIONS).await?;
        }
        debug!(count = pending.len(), "Notifications cleared");
        Ok(pending.len())
    }

    pub async fn pending_notifications(&self) -> Result<usize> {
        let pending: Vec<String> = read_json(self.store.as_ref(), keys::NOTIFICATIONS)
            .await?
            .unwrap_or_default();
        Ok(pending.len())
    }

    /// The `limit` newest alerts from the history.
    pub async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertDetail>> {
        let mut history = self.get_all_alerts().await?;
        history.sort_by(sort_by_created_at);
        history.truncate(limit);
        Ok(history)
    }

    async fn load_list(&self, key: &str) -> Result<Vec<AlertDetail>> {
        Ok(read_json(self.store.as_ref(), key).await?.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
