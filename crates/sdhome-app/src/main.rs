//! Composition root for the core event pipeline and automation engine
//! (§2). No HTTP/WebSocket surface lives here — that layer is an explicit
//! non-goal (§1) and consumes this process only through the broadcaster
//! port and the persisted store, both of which are wired below and handed
//! to nothing outside this crate.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use sdhome_automation::{AutomationEngine, E2eTracker};
use sdhome_broker::{IngestionWorker, MqttPublisher, PairingCoordinator, StateSyncWorker};
use sdhome_core::config::AppConfig;
use sdhome_core::{NoOpBroadcaster, SharedBroadcaster, SharedClock, SharedPublisher, SystemClock};
use sdhome_pipeline::SignalsService;
use sdhome_storage::Store;

/// Runs the sdhome event pipeline and automation engine.
#[derive(Parser, Debug)]
#[command(name = "sdhome", author, version, about, long_about = None)]
struct Args {
    /// Path to the redb database file. Overrides SDHOME_DB_PATH.
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 8)]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = AppConfig::from_env();
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    tracing::info!(
        broker_host = %config.broker.host,
        broker_port = config.broker.port,
        db_path = %config.db_path,
        "starting sdhome core"
    );

    let store = Arc::new(Store::open(&config.db_path)?);
    let clock: SharedClock = Arc::new(SystemClock);
    // The HTTP/WebSocket layer owns the real broadcaster implementation
    // (§1 non-goal); this process pushes into a no-op sink until wired to
    // one externally.
    let broadcaster: SharedBroadcaster = Arc::new(NoOpBroadcaster);
    let publisher: SharedPublisher = Arc::new(MqttPublisher::new(
        config.broker.host.clone(),
        config.broker.port,
        config.broker.enabled,
    ));
    let tracker = Arc::new(E2eTracker::new(broadcaster.clone()));

    let engine = Arc::new(AutomationEngine::new(
        store.clone(),
        publisher.clone(),
        broadcaster.clone(),
        clock.clone(),
        tracker,
        config.location,
        config.broker.base_topic.clone(),
    ));
    engine.warm_caches()?;
    let _tick_task = engine.clone().spawn_time_tick_task();

    let signals = Arc::new(SignalsService::new(
        store.clone(),
        broadcaster.clone(),
        engine.clone(),
        clock.clone(),
        config.broker.base_topic.clone(),
    ));

    let pairing = PairingCoordinator::new(
        config.broker.bridge_event_topic(),
        config.broker.bridge_permit_join_response_topic(),
        broadcaster.clone(),
        clock.clone(),
        store.clone(),
    );

    let ingestion = IngestionWorker::new(&config.broker, signals, pairing);
    let ingestion_task = tokio::spawn(ingestion.run());

    StateSyncWorker::new(
        &config.broker,
        &config.state_sync,
        store.clone(),
        broadcaster.clone(),
        publisher.clone(),
        clock.clone(),
    )
    .spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping");
    ingestion_task.abort();

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "sdhome=debug" } else { "sdhome=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
