use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rollcall_core::VerificationPipeline;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod entry_lock;
mod recorder;
mod settlement;
mod store;

const BUS_NAME: &str = "org.rollcall.Rollcall1";
const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    config
        .engine
        .validate()
        .context("invalid engine configuration")?;

    let store = store::AttendanceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening attendance database {}", config.db_path.display()))?;
    tracing::info!(db_path = %config.db_path.display(), "attendance store opened");

    let recorder = recorder::Recorder::new(store, config.engine.eligibility.max_daily_entries);
    let engine = engine::spawn_engine(VerificationPipeline::new(
        config.engine.verification.clone(),
    ))?;

    tokio::spawn(settlement::run_sweeper(
        engine.clone(),
        recorder.clone(),
        SWEEP_INTERVAL,
    ));

    let session_bus = config.session_bus;
    let device = config.device_label.clone();
    let service = dbus_interface::RollcallService {
        state: Arc::new(dbus_interface::AppState {
            config,
            engine,
            recorder,
        }),
    };

    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the bus"))?;

    tracing::info!(device, bus = BUS_NAME, session_bus, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
