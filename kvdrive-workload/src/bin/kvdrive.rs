//! Load driver binary.
//!
//! Runs a workload profile against the in-process store and prints per-engine
//! and aggregate statistics.
//!
//! ```bash
//! # Built-in profile, 30 seconds
//! kvdrive --profile read-heavy --duration-secs 30
//!
//! # Custom config with overrides
//! kvdrive --config run.toml --engines 8 --sequence "get:4,destroy:1"
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kvdrive_workload::{
    build_engines, list_profiles, load_profile, merge_stats, run_engines, DriverConfig,
    MemoryStoreClient, Sequence, StopReason,
};

/// Paced create/read/update/delete load driver.
#[derive(Parser, Debug)]
#[command(name = "kvdrive")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(long, conflicts_with = "profile")]
    config: Option<PathBuf>,

    /// Built-in profile name.
    #[arg(long)]
    profile: Option<String>,

    /// Print the built-in profile names and exit.
    #[arg(long)]
    list_profiles: bool,

    /// Number of concurrent engines.
    #[arg(long)]
    engines: Option<u32>,

    /// Run length in seconds (0 runs until interrupted).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Target requests per second per engine (0 = unlimited).
    #[arg(long)]
    rate: Option<u32>,

    /// Preloaded key range size (0 = dynamic keys).
    #[arg(long)]
    num_keys: Option<u64>,

    /// Operation sequence, e.g. `create:1,get:4,destroy:1`.
    #[arg(long)]
    sequence: Option<Sequence>,

    /// Base random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Args {
    fn load_config(&self) -> Result<DriverConfig, Box<dyn std::error::Error>> {
        let mut config = match (&self.config, &self.profile) {
            (Some(path), _) => DriverConfig::from_file(path)?,
            (None, Some(name)) => load_profile(name)?,
            (None, None) => DriverConfig::default(),
        };
        if let Some(engines) = self.engines {
            config.run.engines = engines;
        }
        if let Some(duration) = self.duration_secs {
            config.run.duration_secs = duration;
        }
        if let Some(rate) = self.rate {
            config.rate.target = rate;
        }
        if let Some(num_keys) = self.num_keys {
            config.workload.num_keys = num_keys;
        }
        if let Some(sequence) = &self.sequence {
            config.workload.sequence = sequence.clone();
        }
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.list_profiles {
        for name in list_profiles() {
            println!("{name}");
        }
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = args.load_config()?;
    info!(
        profile = %config.name,
        engines = config.run.engines,
        duration_secs = config.run.duration_secs,
        target_rate = config.rate.target,
        num_keys = config.workload.num_keys,
        sequence = %config.workload.sequence,
        "Starting load driver"
    );

    let client = Arc::new(MemoryStoreClient::new());
    if config.workload.num_keys > 0 {
        let payload = Bytes::from(vec![0u8; 1024]);
        let workload = &config.workload;
        client
            .preload(workload.offset_get, workload.num_keys, payload.clone())
            .await;
        if workload.offset_del != workload.offset_get {
            client
                .preload(workload.offset_del, workload.num_keys, payload)
                .await;
        }
        info!(keys = client.live_keys().await, "preloaded store");
    }

    let engines = build_engines(&config, &client)?;
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, draining engines");
            signal_cancel.cancel();
        }
    });
    if let Some(duration) = config.duration() {
        let timer_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timer_cancel.cancel();
        });
    }

    let reports = run_engines(engines, cancel).await;

    for report in &reports {
        if report.stop_reason == StopReason::CircuitBreaker {
            warn!(engine = report.engine, "engine aborted by circuit breaker");
        }
        println!(
            "engine {} ({:?}, restored {} of {}):\n{}",
            report.engine,
            report.stop_reason,
            report.restore_attempts - report.restore_failures,
            report.restore_attempts,
            report.stats.summary()
        );
    }
    println!("total:\n{}", merge_stats(&reports).summary());

    info!(live_keys = client.live_keys().await, "Load driver finished");
    Ok(())
}
