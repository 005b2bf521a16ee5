//! Uptime reconciler.
//!
//! Periodically probes a set of targets, keeps incident and latency history
//! in a durable key-value store, and announces status changes.

mod config;
mod db;
mod discovery;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::{ServerConfig, WorkerConfig};
use db::{KvStore, SqliteKvStore};
use discovery::{CloudflareDiscovery, Discovery};
use notify::AppriseSender;
use probe::{HttpProber, Prober, RemoteChecker};
use scheduler::{ReconcileContext, Reconciler, Scheduler};
use web::{AppState, Server};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_reconciler=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let worker = Arc::new(WorkerConfig::from_file(&cfg.config_path)?);
    tracing::info!(
        "Loaded {} monitors from {} (location {})",
        worker.monitors.len(),
        cfg.config_path,
        cfg.location
    );

    // Initialize store
    let store: Arc<dyn KvStore> = Arc::new(SqliteKvStore::new(&cfg.db_path)?);
    tracing::info!("Using database at {}", cfg.db_path);

    let prober: Arc<dyn Prober> = Arc::new(HttpProber::new()?);

    let discovery: Option<Arc<dyn Discovery>> =
        match (&cfg.cloudflare_zone_id, &cfg.cloudflare_api_token) {
            (Some(zone), Some(token)) => {
                tracing::info!("DNS auto-discovery enabled for zone {}", zone);
                Some(Arc::new(CloudflareDiscovery::new(zone, token)?) as Arc<dyn Discovery>)
            }
            _ => None,
        };

    let ctx = ReconcileContext {
        config: worker.clone(),
        store: store.clone(),
        location: cfg.location.clone(),
    };
    let mut reconciler = Reconciler::new(ctx, prober.clone(), RemoteChecker::new()?)?;
    if let Some(discovery) = &discovery {
        reconciler = reconciler.with_discovery(discovery.clone());
    }
    match worker.apprise() {
        Some((server, recipient)) => {
            reconciler = reconciler.with_sender(Arc::new(AppriseSender::new(server, recipient)?));
        }
        None => tracing::info!("Apprise API server or recipient URL not set, notifications disabled"),
    }

    if cfg.run_once {
        let report = reconciler.run().await?;
        tracing::info!(
            "Run complete: {} targets, {} up, {} down, persisted {}",
            report.targets,
            report.up,
            report.down,
            report.persisted
        );
        return Ok(());
    }

    // Start scheduler
    let scheduler = Scheduler::new(Arc::new(reconciler), Duration::from_secs(cfg.interval_secs));
    scheduler.start().await;

    // Start web server
    let server = Server::new(
        cfg.http_port,
        AppState {
            location: cfg.location.clone(),
            worker,
            store,
            prober,
            discovery,
        },
    );
    let served = server.start().await;
    scheduler.stop().await;
    served
}
