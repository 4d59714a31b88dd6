// Relay Engine server
// Run with: cargo run --bin server

//! Starts the HTTP surface (inbound webhook mapper, delivery replay,
//! health) and the three background loops: the countdown trigger sweep,
//! the webhook delivery worker and the hourly metrics rollup. Storage is
//! in-memory; everything resets on restart.

use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_engine::api::{build_router, ApiState};
use relay_engine::engine::outbox::DeliveryWorker;
use relay_engine::engine::rollup::MetricsRollup;
use relay_engine::engine::scheduler::TriggerSweep;
use relay_engine::engine::stage_actions::StageActionEngine;
use relay_engine::{ActionDispatcher, EngineConfig, InMemoryStore};

#[derive(Parser, Debug)]
#[command(name = "relay-engine", about = "Multi-tenant automation and delivery engine")]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "RELAY_PORT", default_value_t = 4000)]
    port: u16,

    /// Seconds between trigger sweep passes
    #[arg(long, env = "RELAY_SWEEP_INTERVAL_SECS", default_value_t = 10)]
    sweep_interval: u64,

    /// Seconds between delivery worker passes
    #[arg(long, env = "RELAY_DELIVERY_INTERVAL_SECS", default_value_t = 15)]
    delivery_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env();

    info!("🚀 Starting Relay Engine server");
    info!("Server: {}:{}", args.host, args.port);
    info!(
        "Delivery: {} attempts max, {:?} base backoff",
        config.delivery_max_attempts, config.delivery_backoff_base
    );

    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Arc::new(ActionDispatcher::new(store.clone(), config.clone()));
    let stage_engine = Arc::new(StageActionEngine::new(store.clone(), dispatcher.clone()));
    let delivery_worker = Arc::new(DeliveryWorker::new(store.clone(), config.clone()));

    // Background loop: fire due countdown trigger instances
    let sweep = TriggerSweep::new(store.clone(), dispatcher.clone());
    let sweep_interval = Duration::from_secs(args.sweep_interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep.run(chrono::Utc::now()).await {
                warn!(error = %err, "trigger sweep pass failed");
            }
        }
    });

    // Background loop: attempt due webhook deliveries
    let worker = delivery_worker.clone();
    let delivery_interval = Duration::from_secs(args.delivery_interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(delivery_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = worker.run_once(chrono::Utc::now()).await {
                warn!(error = %err, "delivery pass failed");
            }
        }
    });

    // Background loop: hourly metrics rollup and error pruning
    let rollup = MetricsRollup::new(store.clone(), config.error_retention_days);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            if let Err(err) = rollup.run(chrono::Utc::now()).await {
                warn!(error = %err, "metrics rollup failed");
            }
        }
    });

    let app = build_router(ApiState {
        store,
        dispatcher,
        stage_engine,
        delivery_worker,
    });

    let addr = format!("{}:{}", args.host, args.port).parse()?;
    info!("📡 Listening on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
