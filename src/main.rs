//! Wallet Guard service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires storage, telemetry and the version checker into the wallet
//! status aggregator, serves the dashboard API and optionally refreshes
//! wallet versions on a fixed interval until shut down.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use walletguard::alerts::AlertHandler;
use walletguard::config::{self, AppConfig};
use walletguard::dashboard::{self, routes::DashboardState};
use walletguard::engine::aggregator::WalletStatusAggregator;
use walletguard::engine::session::DashboardSession;
use walletguard::engine::version_check::{
    ExtensionDirVersions, HttpLatestVersions, InstalledVersionSource, StaticInstalledVersions,
    VersionService,
};
use walletguard::storage::{JsonFileStore, KeyValueStore};
use walletguard::telemetry::{HttpSink, Telemetry, TelemetryDispatcher, TelemetrySink, TracingSink};
use walletguard::types::GuardError;

const BANNER: &str = r#"
 __        __    _ _      _      ____                     _
 \ \      / /_ _| | | ___| |_   / ___|_   _  __ _ _ __ __| |
  \ \ /\ / / _` | | |/ _ \ __| | |  _| | | |/ _` | '__/ _` |
   \ V  V / (_| | | |  __/ |_  | |_| | |_| | (_| | | | (_| |
    \_/\_/ \__,_|_|_|\___|\__|  \____|\__,_|\__,_|_|  \__,_|

  Wallet version tracking & alert aggregation
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    let wallets = cfg.wallets();
    info!(
        name = %cfg.guard.name,
        wallets = ?wallets,
        cooldown_ms = cfg.guard.refresh_cooldown_ms,
        poll_interval_secs = ?cfg.guard.poll_interval_secs,
        "Wallet Guard starting up"
    );

    // -- Components ------------------------------------------------------

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&cfg.storage.path).await?);
    let alerts = Arc::new(AlertHandler::new(store.clone()));

    let (telemetry, dispatcher) = build_telemetry(&cfg)?;

    let latest = Arc::new(HttpLatestVersions::new(
        cfg.versions.latest_versions_url.clone(),
        cfg.versions.request_timeout_secs,
    )?);
    let installed: Arc<dyn InstalledVersionSource> = match &cfg.versions.extensions_dir {
        Some(dir) => {
            info!(dir = %dir, "Reading installed versions from extensions directory");
            Arc::new(ExtensionDirVersions::new(dir))
        }
        None => Arc::new(StaticInstalledVersions::new(cfg.installed_versions())),
    };
    let checker = Arc::new(VersionService::new(
        store.clone(),
        alerts.clone(),
        latest,
        installed,
        wallets.clone(),
    ));

    let aggregator = Arc::new(
        WalletStatusAggregator::new(store.clone(), checker, wallets)
            .with_cooldown(cfg.refresh_cooldown()),
    );
    let session = Arc::new(DashboardSession::new(
        aggregator.clone(),
        alerts,
        store,
        telemetry,
    ));

    let records = aggregator.reload().await?;
    info!(count = records.len(), "Wallet records loaded");

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(
            Arc::new(DashboardState::new(session.clone())),
            cfg.dashboard.port,
        )
        .await?;
    }

    // -- Main loop -------------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    match cfg.guard.poll_interval_secs {
        Some(secs) => {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            info!(interval_secs = secs, "Entering refresh loop. Press Ctrl+C to stop.");
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = &mut shutdown => {
                        info!("Shutdown signal received.");
                        break;
                    }
                }
                // A refresh in flight is abandoned on shutdown.
                tokio::select! {
                    _ = run_refresh(&aggregator) => {}
                    _ = &mut shutdown => {
                        info!("Shutdown signal received during refresh.");
                        break;
                    }
                }
            }
        }
        None => {
            info!("Background refresh disabled. Press Ctrl+C to stop.");
            if let Err(e) = (&mut shutdown).await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
    }

    if let Some(dispatcher) = dispatcher {
        dispatcher.shutdown().await;
        info!("Telemetry flushed");
    }
    info!("Wallet Guard shut down cleanly.");
    Ok(())
}

/// One scheduled refresh; failures are logged and the loop continues.
async fn run_refresh(aggregator: &WalletStatusAggregator) {
    match aggregator.refresh().await {
        Ok(records) => {
            for r in &records {
                info!(
                    wallet = %r.name,
                    local = %r.local_version,
                    latest = %r.latest_version,
                    outdated = r.is_outdated(),
                    "Wallet status"
                );
            }
        }
        Err(e) if matches!(e.downcast_ref::<GuardError>(), Some(GuardError::RefreshCoolingDown)) => {
            info!("Skipping scheduled refresh, cool-down active");
        }
        Err(e) => error!(error = %format!("{e:#}"), "Scheduled refresh failed"),
    }
}

/// The dispatcher is returned so shutdown can flush queued events.
fn build_telemetry(cfg: &AppConfig) -> Result<(Telemetry, Option<TelemetryDispatcher>)> {
    if !cfg.telemetry.enabled {
        info!("Telemetry disabled");
        return Ok((Telemetry::disabled(), None));
    }

    let sink: Arc<dyn TelemetrySink> = match (&cfg.telemetry.endpoint, &cfg.telemetry.api_key_env) {
        (Some(endpoint), Some(key_env)) => match AppConfig::resolve_env(key_env) {
            Ok(key) => Arc::new(HttpSink::new(
                endpoint.clone(),
                SecretString::new(key),
                cfg.telemetry
                    .distinct_id
                    .clone()
                    .unwrap_or_else(|| cfg.guard.name.clone()),
            )?),
            Err(e) => {
                warn!(error = %e, "No telemetry API key, logging events instead");
                Arc::new(TracingSink)
            }
        },
        _ => Arc::new(TracingSink),
    };

    let (telemetry, dispatcher) = Telemetry::spawn(sink);
    Ok((telemetry, Some(dispatcher)))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("walletguard=info"));

    let json_logging = std::env::var("WALLETGUARD_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
