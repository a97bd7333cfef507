//! quotad — the quota scheduler daemon.
//!
//! Drives one `Scheduler` per configured pool:
//! - `simulate` replays the pools on a synthetic clock and prints every
//!   mutation as a JSON line
//! - `run` ticks every pool concurrently on the wall clock, persisting a
//!   snapshot after each pass, until Ctrl-C
//! - `inspect` prints stored snapshots
//!
//! # Usage
//!
//! ```text
//! quotad simulate --config quota.toml --passes 10 --tick-ms 1000
//! quotad run --config quota.toml --data-dir /var/lib/quotad
//! quotad inspect --data-dir /var/lib/quotad --pool default
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use quota_core::QuotaConfig;
use quota_state::{Mutation, SnapshotStore};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quotad::{PoolDriver, epoch_millis};

const DEFAULT_FILTER: &str = "info,quotad=debug,quota=debug";
const DB_FILE: &str = "quota.redb";

#[derive(Parser)]
#[command(name = "quotad", about = "Quota scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay the configured pools on a synthetic clock.
    Simulate {
        /// Path to quota.toml.
        #[arg(long)]
        config: PathBuf,

        /// Number of scheduling passes per pool.
        #[arg(long, default_value = "1")]
        passes: u32,

        /// Simulated milliseconds between passes.
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Persist post-pass snapshots here.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Schedule every pool on the wall clock until interrupted.
    Run {
        /// Path to quota.toml.
        #[arg(long)]
        config: PathBuf,

        /// Data directory for snapshots.
        #[arg(long, default_value = "/var/lib/quotad")]
        data_dir: PathBuf,

        /// Milliseconds between passes.
        #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
        tick_ms: u64,
    },

    /// Print stored snapshots as JSON.
    Inspect {
        /// Data directory for snapshots.
        #[arg(long, default_value = "/var/lib/quotad")]
        data_dir: PathBuf,

        /// Only this pool.
        #[arg(long)]
        pool: Option<String>,
    },
}

/// One line of `simulate` output.
#[derive(Serialize)]
struct MutationLine<'a> {
    pool: &'a str,
    mutation: &'a Mutation,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            passes,
            tick_ms,
            data_dir,
        } => simulate(&config, passes, tick_ms, data_dir.as_deref()).await,
        Command::Run {
            config,
            data_dir,
            tick_ms,
        } => run(&config, &data_dir, tick_ms).await,
        Command::Inspect { data_dir, pool } => inspect(&data_dir, pool.as_deref()),
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<SnapshotStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let store = SnapshotStore::open(&db_path)?;
    info!(path = ?db_path, "snapshot store opened");
    Ok(store)
}

async fn simulate(
    config_path: &Path,
    passes: u32,
    tick_ms: u64,
    data_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let config = QuotaConfig::from_file(config_path)?;
    let store = data_dir.map(open_store).transpose()?;

    for spec in &config.pools {
        let driver = PoolDriver::new(
            spec.id.clone(),
            quota_scheduler::Scheduler::from_pool(spec, 0)?,
            store.clone(),
        );
        for pass in 1..=u64::from(passes) {
            let mutations = driver.tick(pass * tick_ms).await?;
            for mutation in &mutations {
                let line = MutationLine {
                    pool: driver.pool_id(),
                    mutation,
                };
                println!("{}", serde_json::to_string(&line)?);
            }
        }
    }
    Ok(())
}

async fn run(config_path: &Path, data_dir: &Path, tick_ms: u64) -> anyhow::Result<()> {
    let config = QuotaConfig::from_file(config_path)?;
    let store = open_store(data_dir)?;
    info!(pools = config.pools.len(), "quotad starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_millis(tick_ms);
    let now = epoch_millis();

    let mut handles = Vec::with_capacity(config.pools.len());
    for spec in &config.pools {
        let driver = PoolDriver::restore_or_build(spec, Some(store.clone()), now)?;
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            driver.run(interval, shutdown).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    info!("quotad stopped");
    Ok(())
}

fn inspect(data_dir: &Path, pool: Option<&str>) -> anyhow::Result<()> {
    let store = SnapshotStore::open(&data_dir.join(DB_FILE))?;
    let pools = match pool {
        Some(id) => vec![id.to_string()],
        None => store.list_pools()?,
    };
    for id in pools {
        let Some(snapshot) = store.get_snapshot(&id)? else {
            anyhow::bail!("no snapshot stored for pool {id}");
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}
