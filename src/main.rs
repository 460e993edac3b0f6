/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use metronome::{Scheduler, SchedulerConfig, WaitError};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Metronome scheduled-task executor demo.
///
/// Example:
///   metronome --workers 4 --rate-cycles 5
#[derive(Debug, Parser)]
#[command(
    name = "metronome",
    about = "Scheduled-task executor demo – one-shot, fixed-rate and fixed-delay actions",
    long_about = None,
)]
struct Cli {
    /// Number of worker threads (overrides the config file; default = host parallelism).
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Path to a YAML scheduler configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// How many fixed-rate cycles to observe before cancelling the demo task.
    #[arg(long = "rate-cycles", default_value_t = 3)]
    rate_cycles: u32,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ── Resolve configuration ─────────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => match SchedulerConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load scheduler configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using defaults");
            SchedulerConfig::default()
        }
    };

    if let Some(workers) = cli.workers {
        match NonZeroUsize::new(workers) {
            Some(n) => config.worker_count = n,
            None => {
                error!("--workers must be at least 1");
                process::exit(1);
            }
        }
    }

    info!(workers = config.worker_count.get(), "Configuration");

    let scheduler = Scheduler::from_config(&config)?;
    let epoch = Instant::now();
    let at = move || epoch.elapsed().as_millis();

    // ── One-shot ──────────────────────────────────────────────────────────────
    let one_shot = scheduler.schedule_once(
        move || anyhow::Ok(format!("one-shot ran at t+{}ms", at())),
        Duration::from_millis(200),
    )?;
    info!("{}", one_shot.get().map_err(anyhow::Error::new)?);

    // ── Fixed-rate ────────────────────────────────────────────────────────────
    let rate = scheduler.schedule_at_fixed_rate(
        move || {
            info!("fixed-rate tick at t+{}ms", at());
            anyhow::Ok(())
        },
        Duration::from_millis(100),
        Duration::from_millis(250),
    )?;

    // ── Fixed-delay ───────────────────────────────────────────────────────────
    let delay = scheduler.schedule_with_fixed_delay(
        move || {
            info!("fixed-delay tick at t+{}ms", at());
            std::thread::sleep(Duration::from_millis(80));
            anyhow::Ok(())
        },
        Duration::from_millis(100),
        Duration::from_millis(250),
    )?;

    // Let the periodic tasks tick for a while, then stop them.
    std::thread::sleep(Duration::from_millis(
        100 + 250 * u64::from(cli.rate_cycles),
    ));
    rate.cancel();
    delay.cancel();

    // A handle read after cancellation still reports the first cycle's
    // outcome (or Cancelled if no cycle ever ran).
    match rate.get_timeout(Duration::from_millis(50)) {
        Ok(()) => info!("fixed-rate first cycle completed"),
        Err(WaitError::Cancelled) => info!("fixed-rate task never ran"),
        Err(e) => warn!("fixed-rate task reported: {e}"),
    }

    scheduler.shutdown();
    info!("demo finished at t+{}ms", epoch.elapsed().as_millis());
    Ok(())
}
