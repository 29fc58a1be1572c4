//! Tinpot worker.
//!
//! Embeds the Lua action runtime, announces every discovered action on
//! the broker, and executes trigger requests until interrupted. On
//! SIGINT the worker withdraws its announcements (empty retained
//! payloads) before disconnecting.

mod config;
mod dispatch;

use anyhow::Context;
use clap::Parser;
use config::WorkerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tinpot_broker::{BrokerClient, ConnectHook};
use tinpot_lua::ActionManager;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Tinpot worker - announces and executes Lua actions
#[derive(Parser, Debug)]
#[command(name = "tinpot-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Broker URL (also: MQTT_BROKER)
    #[arg(long)]
    broker: Option<String>,

    /// Directory containing action scripts (also: ACTIONS_DIR)
    #[arg(long)]
    actions_dir: Option<PathBuf>,

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

    let mut config = WorkerConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(broker) = args.broker {
        config.broker_url = broker;
    }
    if let Some(dir) = args.actions_dir {
        config.actions_dir = dir;
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

    info!(
        actions_dir = %config.actions_dir.display(),
        broker = %config.broker_url,
        "starting worker"
    );

    let (manager, report) =
        ActionManager::new(&config.actions_dir).context("initializing action runtime")?;
    for name in &report.actions {
        info!(action = %name, "loaded");
    }

    let hook_manager = manager.clone();
    let on_connect: ConnectHook = Arc::new(move |broker| {
        let manager = hook_manager.clone();
        Box::pin(dispatch::announce_and_subscribe(broker, manager))
    });

    let client_id = format!("tinpot-worker-{}", Uuid::new_v4());
    let broker = BrokerClient::connect(&config.broker_url, &client_id, on_connect)
        .context("connecting to broker")?;

    tokio::signal::ctrl_c().await.context("waiting for SIGINT")?;

    info!("shutting down, withdrawing actions");
    dispatch::withdraw_actions(&broker, &manager).await;
    let _ = broker.disconnect().await;
    Ok(())
}
