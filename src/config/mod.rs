//! # CoreBit Configuration System
//!
//! Typed configuration for pipelines and schedulers, loaded in layers by the
//! [`ConfigManager`]: an optional TOML/YAML file first, then environment
//! variable overrides prefixed with `COREBIT__`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use corebit::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load("config/corebit.toml")?;
//!
//! let batch_size = manager.config().pipeline.batch_size;
//! let cron = manager.config().scheduler.cron.clone();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_PIPELINE_NAME, UNBOUNDED_BATCH_SIZE, WORKERS_PER_STAGE};
use crate::error::{CorebitError, Result};

pub use loader::ConfigManager;

/// What a pipeline run does when a stage fails while processing a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Stop processing remaining batches; finalize and end the stream with the error
    #[default]
    AbortRun,
    /// Skip the failed batch, keep going, and end the stream with the first failure
    SkipBatch,
}

/// What the scheduler does with a trigger that fires while a run is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Start one pending run as soon as the active run completes
    #[default]
    Queue,
    /// Discard the trigger and log an overlap diagnostic
    Drop,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CorebitConfig {
    /// Batching and concurrency settings for the pipeline
    pub pipeline: PipelineConfig,

    /// Recurring execution settings
    pub scheduler: SchedulerConfig,
}

impl CorebitConfig {
    /// Reject values that cannot be normalized into a usable setting
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.pool_acquire_timeout_ms == Some(0) {
            return Err(CorebitError::configuration(
                "pipeline.pool_acquire_timeout_ms must be greater than zero when set",
            ));
        }

        if self.scheduler.iteration_cap == Some(0) {
            return Err(CorebitError::configuration(
                "scheduler.iteration_cap must be at least 1 when set",
            ));
        }

        if let Some(cron) = &self.scheduler.cron {
            if cron.trim().is_empty() {
                return Err(CorebitError::configuration(
                    "scheduler.cron must not be empty when set",
                ));
            }
        }

        Ok(())
    }
}

/// Pipeline batching and worker pool configuration
///
/// `batch_size` and `worker_count` are signed on purpose: non-positive values
/// are sentinels. A non-positive batch size means a single batch holding the
/// whole input; a non-positive worker count means one worker per stage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Diagnostic name used in logs and errors
    pub name: String,
    pub batch_size: i64,
    pub worker_count: i64,
    /// Bounded wait for a worker pool slot; unbounded when unset
    pub pool_acquire_timeout_ms: Option<u64>,
    pub failure_policy: BatchFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PIPELINE_NAME.to_string(),
            batch_size: UNBOUNDED_BATCH_SIZE,
            worker_count: WORKERS_PER_STAGE,
            pool_acquire_timeout_ms: None,
            failure_policy: BatchFailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn pool_acquire_timeout(&self) -> Option<Duration> {
        self.pool_acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Recurring execution configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cron expression (5, 6 or 7 fields); scheduling is disabled when unset
    pub cron: Option<String>,
    /// Number of completed runs after which the scheduler exhausts itself
    pub iteration_cap: Option<u64>,
    pub overlap_policy: OverlapPolicy,
}
