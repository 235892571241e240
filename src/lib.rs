#![allow(clippy::doc_markdown)] // Allow technical terms like CoreBit, YAML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # CoreBit
//!
//! Batch-oriented task pipelines with bounded concurrency and recurring execution.
//!
//! ## Overview
//!
//! A [`Pipeline`] runs an ordered list of stages over its input, one batch at a
//! time, and streams each batch's output back to the caller as soon as it is
//! ready. Stages fan work out through a bounded [`WorkerPool`]. A [`Scheduler`]
//! re-triggers a pipeline on a cron schedule, optionally capped to a fixed
//! number of completed runs.
//!
//! ## Module Organization
//!
//! - [`pipeline`] - Stage contract, batching, worker pool and orchestrator
//! - [`scheduler`] - Cron and interval triggers plus the scheduler service
//! - [`workflow`] - YAML workflow definitions and the stage registry
//! - [`config`] - Layered configuration (file + `COREBIT__` environment)
//! - [`logging`] - Structured logging setup and operation helpers
//! - [`error`] - Structured error handling
//!
//! ## Guarantees
//!
//! - Every stage is initialized exactly once before the first batch and
//!   finalized exactly once after the last, even when a run fails, panics or is
//!   cancelled; a stage never reached by initialization is not finalized either
//! - No worker pool unit of a run is still running once its stages finalize
//! - Batches are emitted in input order, and a failed run ends its stream with
//!   exactly one error
//! - The worker pool never runs more units than its capacity
//! - A scheduler never has more than one triggered run in progress
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use corebit::pipeline::{ParallelMapStage, Pipeline, Stage};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> corebit::Result<()> {
//! let double: Arc<dyn Stage<u64>> =
//!     Arc::new(ParallelMapStage::new("double", |n: u64| async move { Ok(n * 2) }));
//!
//! let pipeline = Pipeline::new("doubler", vec![double], 100, 8)?;
//! let mut run = pipeline.call((1..=1_000).collect(), None);
//!
//! while let Some(batch) = run.next().await {
//!     println!("batch of {} elements", batch?.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Time-driven scheduler tests run on a paused tokio clock:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod workflow;

pub use config::{BatchFailurePolicy, CorebitConfig, OverlapPolicy, PipelineConfig, SchedulerConfig};
pub use error::{CorebitError, Result, StagePhase};
pub use pipeline::{Batch, ParallelMapStage, Pipeline, PipelineRun, RunOutcome, Stage, WorkerPool};
pub use scheduler::{CronTrigger, IntervalTrigger, Scheduler, SchedulerState, SchedulerStats, Trigger};
pub use workflow::{build_pipeline, build_scheduler, StageRegistry, WorkflowDefinition};
