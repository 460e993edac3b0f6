//! Scheduler configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! scheduler:
//!   worker_count: 4
//! ```
//!
//! Every field is optional; missing values fall back to their defaults
//! (`worker_count` defaults to the host parallelism), so an empty
//! `scheduler: {}` file is valid.

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// Kept private – callers work with [`SchedulerConfig`] instead.
#[derive(Debug, Deserialize)]
struct SchedulerConfigFile {
    scheduler: SchedulerEntry,
}

/// Fields as they appear in the YAML file.
#[derive(Debug, Deserialize)]
struct SchedulerEntry {
    /// Number of worker threads.  `0` is rejected; absent means
    /// "host parallelism".
    worker_count: Option<usize>,
}

// ── Public configuration ──────────────────────────────────────────────────────

/// Validated scheduler construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads in the pool.  Always ≥ 1.
    pub worker_count: NonZeroUsize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            worker_count: host_parallelism(),
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or `worker_count` is `0`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading scheduler configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: SchedulerConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let worker_count = match file.scheduler.worker_count {
            None => host_parallelism(),
            Some(0) => bail!(
                "invalid worker_count 0 in {}: the pool needs at least one worker",
                path.display()
            ),
            Some(n) => NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN),
        };

        let config = SchedulerConfig { worker_count };
        debug!(worker_count = config.worker_count.get(), "configuration loaded");
        Ok(config)
    }
}

/// Host parallelism, or a single worker when it cannot be determined.
fn host_parallelism() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
