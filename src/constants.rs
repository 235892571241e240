//! # System Constants
//!
//! Operational defaults and well-known names shared by the pipeline, the
//! scheduler, configuration loading and logging.

/// Operation names used in structured pipeline/scheduler log events
pub mod operations {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
    pub const RUN_CANCELLED: &str = "run.cancelled";
    pub const BATCH_EMITTED: &str = "batch.emitted";
    pub const BATCH_FAILED: &str = "batch.failed";

    pub const SCHEDULER_STARTED: &str = "scheduler.started";
    pub const SCHEDULER_TRIGGER: &str = "scheduler.trigger";
    pub const SCHEDULER_TRIGGER_QUEUED: &str = "scheduler.trigger_queued";
    pub const SCHEDULER_TRIGGER_DROPPED: &str = "scheduler.trigger_dropped";
    pub const SCHEDULER_STOPPED: &str = "scheduler.stopped";
    pub const SCHEDULER_EXHAUSTED: &str = "scheduler.exhausted";
}

/// Environment variables consulted by configuration and logging
pub mod env {
    /// Prefix for configuration overrides, e.g. `COREBIT__PIPELINE__BATCH_SIZE`
    pub const CONFIG_PREFIX: &str = "COREBIT";
    pub const CONFIG_SEPARATOR: &str = "__";
    /// Path to a configuration file picked up by `ConfigManager::load_from_env`
    pub const CONFIG_FILE: &str = "COREBIT_CONFIG";
    pub const ENVIRONMENT: &str = "COREBIT_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    /// Set to `json` for machine-readable log output
    pub const LOG_FORMAT: &str = "COREBIT_LOG_FORMAT";
}

/// Default pipeline name when none is configured
pub const DEFAULT_PIPELINE_NAME: &str = "pipeline";

/// Sentinel batch size meaning "one batch containing every element"
pub const UNBOUNDED_BATCH_SIZE: i64 = 0;

/// Sentinel worker count meaning "one worker per stage"
pub const WORKERS_PER_STAGE: i64 = 0;

/// Number of completed batches the producer may run ahead of the consumer
pub const RESULT_CHANNEL_CAPACITY: usize = 1;
