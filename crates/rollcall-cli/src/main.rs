//! Rollcall CLI
//!
//! The `rollcall` command replays recorded capture traces through the
//! verification engine for calibration, and talks to a running `rollcalld`.
//!
//! ## Commands
//!
//! - `replay`: Run a trace through one attempt and the daily attendance policy
//! - `ear`: Print per-frame openness ratios and blink detector signals
//! - `status`, `progress`, `cancel`, `entries`: Query or control the daemon

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod daemon;
mod replay;
mod trace;

use trace::Trace;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Liveness-checked attendance tooling", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded trace through one verification attempt
    Replay {
        /// JSON-lines trace file
        trace: PathBuf,

        /// TOML file with engine tunables (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Accepted entries the person already has on the attendance day
        #[arg(long, default_value = "0")]
        prior_entries: u32,

        /// Attendance day, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print openness ratios and blink signals for every frame of a trace
    Ear {
        /// JSON-lines trace file
        trace: PathBuf,

        /// TOML file with engine tunables (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show daemon status
    Status,

    /// Show progress of the attempt in progress
    Progress,

    /// Cancel the attempt in progress
    Cancel,

    /// List recorded decisions for a person
    Entries {
        user: String,

        /// Attendance day, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Daemon replies are JSON strings; re-indent them for the terminal.
fn print_reply(reply: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(reply).context("daemon returned malformed JSON")?;
    print_json(&value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Replay {
            trace,
            config,
            prior_entries,
            date,
        } => {
            let config = replay::load_config(config.as_deref())?;
            let trace = Trace::load(&trace)
                .with_context(|| format!("loading trace {}", trace.display()))?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let report = replay::replay(&trace, &config, prior_entries, date, Utc::now())?;
            print_json(&report)
        }
        Commands::Ear { trace, config } => {
            let config = replay::load_config(config.as_deref())?;
            let trace = Trace::load(&trace)
                .with_context(|| format!("loading trace {}", trace.display()))?;
            let rows = replay::ear_rows(&trace, &config.verification.liveness.blink, Utc::now());
            for row in &rows {
                println!("{}", serde_json::to_string(row)?);
            }
            Ok(())
        }
        Commands::Status => {
            let proxy = daemon::connect(cli.session).await?;
            print_reply(&proxy.status().await?)
        }
        Commands::Progress => {
            let proxy = daemon::connect(cli.session).await?;
            print_reply(&proxy.progress().await?)
        }
        Commands::Cancel => {
            let proxy = daemon::connect(cli.session).await?;
            print_reply(&proxy.cancel().await?)
        }
        Commands::Entries { user, date } => {
            let proxy = daemon::connect(cli.session).await?;
            let date = date.map(|d| d.to_string()).unwrap_or_default();
            print_reply(&proxy.entries(&user, &date).await?)
        }
    }
}
