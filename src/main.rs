//! SIP stream engine
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                      SIP ENGINE                      │
//!                  │                                                      │
//!   TCP stream     │  ┌──────────┐    ┌──────────┐    ┌────────────────┐  │
//!   ───────────────┼─▶│   net    │───▶│ framing  │───▶│    parser      │  │
//!                  │  │ listener │    │  framer  │    │ lexer + header │  │
//!                  │  └──────────┘    └────┬─────┘    └────────────────┘  │
//!                  │                       │                              │
//!                  │                       ▼                              │
//!                  │                ┌──────────────┐    ┌──────────────┐  │
//!                  │                │   dispatch   │───▶│ worker pool  │──┼──▶ MessageHandler
//!                  │                │ per Call-ID  │    │  + watchdog  │  │
//!                  │                └──────────────┘    └──────────────┘  │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use sip_engine::config::{self, EngineConfig};
use sip_engine::dispatch::{LoggingHandler, WorkerPool};
use sip_engine::framing::FramerSettings;
use sip_engine::lifecycle::{spawn_signal_handler, Shutdown};
use sip_engine::net::{Listener, Pipeline, SipServer};
use sip_engine::observability::{logging, metrics};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "sip-engine", version, about = "SIP stream framing and dispatch engine")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `dispatch.worker_threads` (0 delivers inline).
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(workers) = args.workers {
        config.dispatch.worker_threads = workers;
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sip-engine starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_message_size = config.framing.max_message_size,
        read_timeout_ms = config.framing.read_timeout_ms,
        worker_threads = config.dispatch.worker_threads,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let pool = match config.dispatch.worker_threads {
        0 => None,
        threads => Some(Arc::new(WorkerPool::new(
            threads,
            &config.dispatch.thread_name,
            Duration::from_millis(config.dispatch.stuck_task_timeout_ms),
        )?)),
    };

    let mut pipeline = Pipeline::new(Arc::new(LoggingHandler), FramerSettings::from(&config.framing));
    if let Some(pool) = &pool {
        pipeline = pipeline.with_pool(Arc::clone(pool));
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = SipServer::new(listener, pipeline);
    let tracker = server.tracker();

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server.run(shutdown.subscribe()).await?;

    if !tracker.wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(remaining = tracker.active_count(), "Connections still open at exit");
    }
    if let Some(pool) = pool {
        tokio::task::spawn_blocking(move || pool.join()).await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
