//! upwatch - HTTP endpoint uptime and latency monitor.
//!
//! Probes every registered URL on a configurable schedule and keeps rolling
//! latency averages, the current uptime streak and a latency history.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{ProbeStore, Store};
use probe::HttpProber;
use scheduler::{ProbeCycle, ScheduleInterval, Scheduler};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("upwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting upwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let prober = Arc::new(HttpProber::new(cfg.probe_timeout)?);
    tracing::info!("Probe timeout is {:?}", prober.timeout());

    let cycle = Arc::new(ProbeCycle::new(store.clone(), prober, cfg.cycle_options()));

    // Resume the stored cadence, falling back to the default if it is unusable
    let stored = store.get_schedule_interval()?;
    let interval = match stored.parse::<ScheduleInterval>() {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!("{}, using {}", e, ScheduleInterval::default());
            ScheduleInterval::default()
        }
    };

    let (scheduler, trigger) = Scheduler::start(interval.as_str(), cycle.job())?;
    tracing::info!("Scheduler started with trigger {}", trigger);

    // Start web server
    let server = Server::new(cfg, store, Arc::new(scheduler));
    server.start().await?;

    Ok(())
}
