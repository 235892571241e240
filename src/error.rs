//! # Error Types
//!
//! Structured error handling for the pipeline core using thiserror.
//!
//! Every failure the core can produce is recoverable by the caller: configuration
//! problems are returned synchronously from constructors, while stage failures,
//! cancellation and pool saturation are surfaced as terminal items on the
//! result stream of a pipeline run.

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Lifecycle phase of a stage in which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagePhase {
    Initialize,
    Process,
    Finalize,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagePhase::Initialize => write!(f, "initialize"),
            StagePhase::Process => write!(f, "process"),
            StagePhase::Finalize => write!(f, "finalize"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorebitError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Stage '{stage}' failed during {phase}: {message}")]
    Stage {
        stage: String,
        phase: StagePhase,
        message: String,
    },

    #[error("Pipeline '{pipeline}' run was cancelled")]
    Cancelled { pipeline: String },

    #[error("Worker pool saturated: no slot of {capacity} freed within {waited_ms}ms")]
    PoolSaturationTimeout { capacity: usize, waited_ms: u64 },

    #[error("Unit of work panicked: {message}")]
    UnitPanicked { message: String },

    #[error("Trigger for pipeline '{pipeline}' dropped: a previous run is still in progress")]
    SchedulerOverlap { pipeline: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl CorebitError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CorebitError::Configuration {
            message: message.into(),
        }
    }

    /// Error raised from a stage's `process` step
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        CorebitError::Stage {
            stage: stage.into(),
            phase: StagePhase::Process,
            message: message.into(),
        }
    }

    pub fn stage_in_phase(
        stage: impl Into<String>,
        phase: StagePhase,
        message: impl Into<String>,
    ) -> Self {
        CorebitError::Stage {
            stage: stage.into(),
            phase,
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        CorebitError::InvalidState {
            message: message.into(),
        }
    }

    /// Re-attribute an error to a stage lifecycle phase.
    ///
    /// Stage errors keep their own attribution; anything else a stage returns
    /// (pool saturation, configuration) is wrapped so the caller sees which
    /// stage and phase produced it. Cancellation passes through untouched.
    pub fn in_stage(self, stage: &str, phase: StagePhase) -> Self {
        match self {
            CorebitError::Stage { .. } | CorebitError::Cancelled { .. } => self,
            other => CorebitError::Stage {
                stage: stage.to_string(),
                phase,
                message: other.to_string(),
            },
        }
    }

    /// Turn a caught panic payload into an error carrying its message
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        CorebitError::UnitPanicked { message }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CorebitError::Cancelled { .. })
    }
}

impl From<config::ConfigError> for CorebitError {
    fn from(err: config::ConfigError) -> Self {
        CorebitError::configuration(err.to_string())
    }
}

impl From<serde_yaml::Error> for CorebitError {
    fn from(err: serde_yaml::Error) -> Self {
        CorebitError::configuration(format!("invalid workflow definition: {err}"))
    }
}

impl From<cron::error::Error> for CorebitError {
    fn from(err: cron::error::Error) -> Self {
        CorebitError::configuration(format!("invalid cron expression: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, CorebitError>;
