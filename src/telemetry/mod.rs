//! Fire-and-forget product telemetry.
//!
//! `Telemetry::capture` enqueues an event and returns immediately. A
//! background task drains the queue into a `TelemetrySink`; sink failures
//! are logged and dropped there, so they never reach the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const EVENT_VISIT_DASHBOARD: &str = "visit dashboard";
pub const EVENT_MALICIOUS_EXTENSION_DISABLED: &str = "malicious extension disabled";

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub event: String,
    pub properties: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Destination for captured events.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, event: &TelemetryEvent) -> Result<()>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Handle + dispatcher
// ---------------------------------------------------------------------------

/// Cheap, cloneable capture handle.
#[derive(Clone)]
pub struct Telemetry {
    tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
}

/// Owner side of the dispatcher task.
pub struct TelemetryDispatcher {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl TelemetryDispatcher {
    /// Stop accepting events, deliver what is already queued, then wait for
    /// the task to exit. Live `Telemetry` handles do not hold it open.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Telemetry dispatcher ended abnormally");
        }
    }
}

impl Telemetry {
    /// Spawn the dispatcher task for `sink`. The task runs until every
    /// handle is dropped or [`TelemetryDispatcher::shutdown`] is called.
    /// Dropping the dispatcher detaches the task.
    pub fn spawn(sink: Arc<dyn TelemetrySink>) -> (Self, TelemetryDispatcher) {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            info!(sink = sink.name(), "Telemetry dispatcher started");
            let mut stop_armed = true;
            loop {
                tokio::select! {
                    biased;
                    next = rx.recv() => {
                        let Some(event) = next else { break };
                        if let Err(e) = sink.send(&event).await {
                            warn!(
                                sink = sink.name(),
                                event = %event.event,
                                error = %e,
                                "Telemetry delivery failed, event dropped"
                            );
                        }
                    }
                    res = &mut stop_rx, if stop_armed => {
                        stop_armed = false;
                        if res.is_ok() {
                            debug!(sink = sink.name(), "Telemetry draining for shutdown");
                            rx.close();
                        }
                    }
                }
            }
            debug!(sink = sink.name(), "Telemetry dispatcher stopped");
        });

        (Self { tx: Some(tx) }, TelemetryDispatcher { handle, stop })
    }

    /// A handle that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn capture(&self, event: &str, properties: serde_json::Value) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = TelemetryEvent {
            event: event.to_string(),
            properties,
            timestamp: Utc::now(),
        };
        if tx.send(event).is_err() {
            debug!("Telemetry dispatcher gone, event dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Writes events to the log.
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn send(&self, event: &TelemetryEvent) -> Result<()> {
        info!(
            target: "walletguard::telemetry",
            event = %event.event,
            properties = %event.properties,
            "Telemetry event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// POSTs each event as JSON to a capture endpoint.
pub struct HttpSink {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    distinct_id: String,
}

#[derive(Serialize)]
struct CapturePayload<'a> {
    api_key: &'a str,
    event: &'a str,
    distinct_id: &'a str,
    properties: &'a serde_json::Value,
    timestamp: String,
}

impl HttpSink {
    pub fn new(endpoint: String, api_key: SecretString, distinct_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("WalletGuard/0.1.0 (telemetry)")
            .build()
            .context("Failed to build HTTP client for telemetry")?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            distinct_id,
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn send(&self, event: &TelemetryEvent) -> Result<()> {
        let payload = CapturePayload {
            api_key: self.api_key.expose_secret(),
            event: &event.event,
            distinct_id: &self.distinct_id,
            properties: &event.properties,
            timestamp: event.timestamp.to_rfc3339(),
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .context("Telemetry request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Telemetry endpoint returned {status}");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TelemetryEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn send(&self, event: &TelemetryEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                anyhow::bail!("sink offline");
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (telemetry, dispatcher) = Telemetry::spawn(sink.clone());

        telemetry.capture("one", serde_json::json!({"n": 1}));
        telemetry.capture("two", serde_json::json!({"n": 2}));
        drop(telemetry);
        dispatcher.shutdown().await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "one");
        assert_eq!(events[1].properties["n"], 2);
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (telemetry, dispatcher) = Telemetry::spawn(sink.clone());

        telemetry.capture("a", serde_json::json!({}));
        telemetry.capture("b", serde_json::json!({}));
        drop(telemetry);

        // The dispatcher keeps going after a failure and exits cleanly.
        dispatcher.shutdown().await;
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_with_live_handles() {
        let sink = Arc::new(RecordingSink::default());
        let (telemetry, dispatcher) = Telemetry::spawn(sink.clone());
        let held = telemetry.clone();

        telemetry.capture("queued", serde_json::json!({}));
        dispatcher.shutdown().await;
        assert_eq!(sink.events.lock().unwrap().len(), 1);

        // After shutdown captures are dropped without error.
        held.capture("late", serde_json::json!({}));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_dispatcher_keeps_delivering() {
        let sink = Arc::new(RecordingSink::default());
        let (telemetry, dispatcher) = Telemetry::spawn(sink.clone());
        drop(dispatcher);

        telemetry.capture("still delivered", serde_json::json!({}));
        for _ in 0..50 {
            if !sink.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_capture_is_noop() {
        Telemetry::disabled().capture("ignored", serde_json::json!({}));
    }
}
