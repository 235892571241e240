//! # Pipeline Module
//!
//! Batch-oriented execution of an ordered list of stages.
//!
//! ## Architecture
//!
//! - **Stage**: capability contract `{initialize, process, finalize}` implemented by
//!   externally supplied processing steps
//! - **Batching**: exact, order-preserving partitioning of a run's input
//! - **Worker Pool**: semaphore-bounded concurrency available to stages inside a batch
//! - **Orchestrator**: sequences lifecycle hooks and batches, streaming results
//!
//! ## Usage
//!
//! ```rust,no_run
//! use corebit::pipeline::{ParallelMapStage, Pipeline, Stage};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> corebit::Result<()> {
//! let shout: Arc<dyn Stage<String>> =
//!     Arc::new(ParallelMapStage::new("shout", |s: String| async move { Ok(s.to_uppercase()) }));
//!
//! let pipeline = Pipeline::new("greetings", vec![shout], 2, 4)?;
//!
//! let mut run = pipeline.call(vec!["hello".into(), "world".into()], None);
//! while let Some(batch) = run.next().await {
//!     println!("{:?}", batch?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batching;
pub mod orchestrator;
pub mod stage;
pub mod worker_pool;

pub use batching::{normalize_batch_size, normalize_worker_count, partition, Batch};
pub use orchestrator::{Pipeline, PipelineRun, RunOutcome, Transform};
pub use stage::{ParallelMapStage, Stage};
pub use worker_pool::{PoolHandle, PoolStats, WorkerPool};
