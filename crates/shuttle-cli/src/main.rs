use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shuttle_core::impls::InMemoryTaskStore;
use shuttle_core::{Scheduler, SchedulerBuilder, SchedulerConfig};
use tracing_subscriber::EnvFilter;

mod config;
mod demo;
mod http;

use crate::config::AppConfig;

/// shuttle - grid task scheduler
#[derive(Debug, Parser)]
#[command(name = "shuttle", version, about = "Grid task scheduler", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, env = "SHUTTLE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (overrides the file).
    #[arg(long, env = "SHUTTLE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control plane on an in-memory store.
    Serve {
        /// Listen address (overrides the file).
        #[arg(short, long, env = "SHUTTLE_BIND")]
        bind: Option<String>,
    },
    /// Seed a dataset and drain it with simulated workers.
    Demo {
        #[arg(long, default_value_t = 20)]
        tasks: u32,
        #[arg(long, default_value_t = 3)]
        workers: u32,
        #[arg(long, default_value_t = 0.3)]
        failure_rate: f64,
        #[arg(long, default_value_t = 3)]
        max_failures: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn init_tracing(level: &str) {
    // RUST_LOG が優先、なければ設定ファイル / フラグの値
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn build_scheduler(config: SchedulerConfig) -> Result<Scheduler> {
    SchedulerBuilder::new()
        .store(Arc::new(InMemoryTaskStore::new()))
        .config(config)
        .build()
        .context("Failed to build scheduler")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = AppConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        app_config.server.log_level = level;
    }
    init_tracing(&app_config.server.log_level);
    tracing::info!(config = ?cli.config, "shuttle starting up");

    let scheduler = build_scheduler(app_config.scheduler)?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(app_config.server.bind);
            http::serve(&bind, scheduler).await
        }
        Command::Demo {
            tasks,
            workers,
            failure_rate,
            max_failures,
            seed,
        } => {
            let options = demo::DemoOptions {
                tasks,
                workers,
                failure_rate,
                max_failures,
                seed,
            };
            demo::run(scheduler, options).await
        }
    }
}
