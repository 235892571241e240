//! # Stage Capability Contract
//!
//! A stage is any value implementing [`Stage`]: an `initialize` hook run once
//! per pipeline run before any batch, a `process` step run once per batch, and
//! a `finalize` hook run once per pipeline run after the last batch (also on
//! failure and cancellation) for every stage whose `initialize` was attempted.
//! A panic in any of them is reported as a failure of that stage.
//!
//! Stage instances are shared by every batch and every run of the pipeline that
//! owns them, so any state they keep must tolerate sequential reuse, and
//! concurrent access if `process` fans out through the [`WorkerPool`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::batching::Batch;
use super::worker_pool::WorkerPool;
use crate::error::{Result, StagePhase};

/// A pluggable processing step of a pipeline
#[async_trait]
pub trait Stage<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Stable name used in logs and error attribution
    fn name(&self) -> &str;

    /// Acquire per-run resources. Called once per run, in stage order.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Transform one batch. The first stage receives the raw batch; every later
    /// stage receives the previous stage's output.
    async fn process(&self, batch: Batch<T>, pool: &WorkerPool) -> Result<Batch<T>>;

    /// Release per-run resources. Called once per run, in stage order, even
    /// when an earlier stage or batch failed.
    ///
    /// Only stages whose `initialize` was attempted are finalized: when stage
    /// `k` fails to initialize (or the run is cancelled during its
    /// `initialize`), stages after `k` see neither call. Pool units the run
    /// submitted have stopped by the time this is called.
    async fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

type ElementFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Stage applying an async function to every element through the worker pool.
///
/// Element order within the batch is preserved. If any element fails, the
/// batch fails with the first failure in element order once every submitted
/// unit has finished.
pub struct ParallelMapStage<T> {
    name: String,
    func: ElementFn<T>,
}

impl<T> ParallelMapStage<T>
where
    T: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let func: ElementFn<T> = Arc::new(move |element| Box::pin(func(element)));
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<T> fmt::Debug for ParallelMapStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelMapStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Stage<T> for ParallelMapStage<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, batch: Batch<T>, pool: &WorkerPool) -> Result<Batch<T>> {
        let size = batch.len();
        let func = Arc::clone(&self.func);
        let results = pool.map_ordered(batch, move |element| func(element)).await;

        let mut output = Vec::with_capacity(size);
        for result in results {
            output.push(result.map_err(|e| e.in_stage(&self.name, StagePhase::Process))?);
        }

        debug!(stage = %self.name, elements = size, "Parallel map stage processed batch");
        Ok(output)
    }
}
