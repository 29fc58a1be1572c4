//! Tinpot coordinator entry point.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tinpot_broker::{BrokerClient, ConnectHook};
use tinpot_coordinator::api::{self, AppState};
use tinpot_coordinator::catalog::{self, Catalog};
use tinpot_coordinator::config::CoordinatorConfig;
use tinpot_coordinator::registry::ExecutionRegistry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Tinpot coordinator - HTTP/SSE facade over the dispatch plane
#[derive(Parser, Debug)]
#[command(name = "tinpot-coordinator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Broker URL (also: MQTT_BROKER)
    #[arg(long)]
    broker: Option<String>,

    /// HTTP listen port (also: PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Sync-execute deadline in seconds (also: SYNC_TIMEOUT_SECS)
    #[arg(long)]
    sync_timeout: Option<u64>,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CoordinatorConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(broker) = args.broker {
        config.broker_url = broker;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(secs) = args.sync_timeout {
        config.sync_timeout_secs = secs;
    }
    if args.debug {
        config.debug = true;
    }

    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let catalog = Arc::new(Catalog::new());
    let registry = Arc::new(ExecutionRegistry::new());

    // Re-issued on every connect so retained announcements replay
    // after a reconnect.
    let hook_catalog = Arc::clone(&catalog);
    let on_connect: ConnectHook = Arc::new(move |broker| {
        let catalog = Arc::clone(&hook_catalog);
        Box::pin(async move {
            if let Err(e) = catalog::subscribe(&broker, catalog).await {
                warn!(error = %e, "catalog subscription failed");
            }
        })
    });

    let client_id = format!("tinpot-coordinator-{}", Uuid::new_v4());
    let broker = BrokerClient::connect(&config.broker_url, &client_id, on_connect)
        .context("connecting to broker")?;

    let port = config.port;
    let state = AppState {
        broker,
        catalog,
        registry,
        config: Arc::new(config),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "coordinator listening");
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}
