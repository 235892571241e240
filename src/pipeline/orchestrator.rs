//! # Pipeline Orchestrator
//!
//! Runs an ordered list of stages over an input sequence, one batch at a time.
//!
//! ## Run lifecycle
//!
//! ```text
//! call(elements)
//!   ├── initialize every stage (list order)
//!   ├── transform (optional, whole input, once)
//!   ├── partition into batches
//!   ├── for each batch: stage[0].process → stage[1].process → … → emit
//!   ├── shut down the run's worker pool
//!   ├── finalize every stage whose initialize was attempted (list order)
//!   └── terminal error, if any, as the last stream item
//! ```
//!
//! Each call runs on its own tokio task and streams results back through a
//! channel with capacity 1, so the producer never works more than one batch
//! ahead of its consumer. Batches are strictly sequential; parallelism only
//! happens inside a stage through the run's [`WorkerPool`].
//!
//! A panic inside a stage lifecycle method or the transform is caught and
//! reported like any other stage failure.

use futures::{FutureExt, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::batching::{normalize_batch_size, normalize_worker_count, partition, Batch};
use super::stage::Stage;
use super::worker_pool::WorkerPool;
use crate::config::{BatchFailurePolicy, PipelineConfig};
use crate::constants::{operations, RESULT_CHANNEL_CAPACITY};
use crate::error::{CorebitError, Result, StagePhase};
use crate::logging::log_pipeline_operation;

/// Function applied once to the whole input before it is partitioned
pub type Transform<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;

/// Stage name that transform failures are attributed to
const TRANSFORM_STAGE: &str = "transform";

/// Await a stage lifecycle call, turning a panic into an error
async fn catch_stage_panic<R>(call: impl Future<Output = Result<R>>) -> Result<R> {
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(CorebitError::from_panic(panic.as_ref())))
}

/// Ordered stage list plus batching and concurrency configuration.
///
/// Cloning is cheap and clones share the same stage instances.
pub struct Pipeline<T> {
    name: String,
    stages: Arc<[Arc<dyn Stage<T>>]>,
    batch_size: Option<usize>,
    worker_count: usize,
    transform: Option<Transform<T>>,
    pool_acquire_timeout: Option<Duration>,
    failure_policy: BatchFailurePolicy,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            stages: Arc::clone(&self.stages),
            batch_size: self.batch_size,
            worker_count: self.worker_count,
            transform: self.transform.clone(),
            pool_acquire_timeout: self.pool_acquire_timeout,
            failure_policy: self.failure_policy,
        }
    }
}

impl<T> fmt::Debug for Pipeline<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names_inner())
            .field("batch_size", &self.batch_size)
            .field("worker_count", &self.worker_count)
            .field("has_transform", &self.transform.is_some())
            .field("pool_acquire_timeout", &self.pool_acquire_timeout)
            .field("failure_policy", &self.failure_policy)
            .finish()
    }
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    fn stage_names_inner(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl<T> Pipeline<T>
where
    T: Send + 'static,
{
    /// Create a pipeline.
    ///
    /// A non-positive `batch_size` processes the whole input as one batch; a
    /// non-positive `worker_count` sizes the pool to the number of stages.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<Arc<dyn Stage<T>>>,
        batch_size: i64,
        worker_count: i64,
    ) -> Result<Self> {
        let name = name.into();

        if stages.is_empty() {
            return Err(CorebitError::configuration(format!(
                "pipeline '{name}' needs at least one stage"
            )));
        }

        let worker_count = normalize_worker_count(worker_count, stages.len());
        if worker_count > Semaphore::MAX_PERMITS {
            return Err(CorebitError::configuration(format!(
                "pipeline '{name}' worker count {worker_count} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }
        let batch_size = normalize_batch_size(batch_size);

        info!(
            pipeline = %name,
            stages = stages.len(),
            batch_size = ?batch_size,
            worker_count = worker_count,
            "🏗️ PIPELINE: Created"
        );

        Ok(Self {
            name,
            stages: stages.into(),
            batch_size,
            worker_count,
            transform: None,
            pool_acquire_timeout: None,
            failure_policy: BatchFailurePolicy::default(),
        })
    }

    /// Create a pipeline from loaded configuration
    pub fn from_config(stages: Vec<Arc<dyn Stage<T>>>, config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.name.clone(),
            stages,
            config.batch_size,
            config.worker_count,
        )?
        .with_failure_policy(config.failure_policy)
        .with_pool_acquire_timeout(config.pool_acquire_timeout()))
    }

    /// Apply `transform` once to the full input of every run, before batching
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Bound how long a pool unit may wait for a free slot
    pub fn with_pool_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_acquire_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: BatchFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stage_names_inner()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Normalized batch size; `None` means one batch holding the whole input
    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn failure_policy(&self) -> BatchFailurePolicy {
        self.failure_policy
    }

    /// Start a run over `elements`.
    ///
    /// The run executes on its own task of the current tokio runtime and its
    /// results are consumed through the returned stream. Outside a runtime
    /// nothing runs and the stream yields a single `InvalidState` error.
    /// Cancelling `cancel`, calling [`PipelineRun::cancel`], or dropping the
    /// run abandons remaining batch work; initialized stages are still
    /// finalized.
    pub fn call(&self, elements: Vec<T>, cancel: Option<CancellationToken>) -> PipelineRun<T> {
        let run_id = Uuid::new_v4();
        let token = cancel
            .map(|parent| parent.child_token())
            .unwrap_or_default();
        let (sender, receiver) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        match Handle::try_current() {
            Ok(runtime) => {
                let span = info_span!("pipeline_run", pipeline = %self.name, run_id = %run_id);
                let pipeline = self.clone();
                let task_token = token.clone();
                runtime.spawn(
                    async move {
                        pipeline.execute(run_id, elements, sender, task_token).await;
                    }
                    .instrument(span),
                );
            }
            Err(_) => {
                error!(pipeline = %self.name, run_id = %run_id, "❌ PIPELINE: Called outside a tokio runtime");
                // Fresh channel with one free slot
                let _ = sender.try_send(Err(CorebitError::invalid_state(format!(
                    "pipeline '{}' must be called within a tokio runtime",
                    self.name
                ))));
            }
        }

        PipelineRun {
            run_id,
            pipeline: self.name.clone(),
            receiver,
            cancel: token,
        }
    }

    async fn execute(
        self,
        run_id: Uuid,
        elements: Vec<T>,
        sender: mpsc::Sender<Result<Batch<T>>>,
        cancel: CancellationToken,
    ) {
        let run_id_str = run_id.to_string();
        let started = Instant::now();
        let input_len = elements.len();

        log_pipeline_operation(
            operations::RUN_STARTED,
            &self.name,
            Some(&run_id_str),
            None,
            "started",
            Some(&format!("{input_len} elements")),
        );

        let (initialized, initialize_result) = self.initialize_stages(&cancel).await;
        let mut terminal = match initialize_result {
            Ok(()) => self
                .run_batches(elements, &sender, &cancel, &run_id_str)
                .await
                .err(),
            Err(e) => Some(e),
        };

        let finalized = self.finalize_stages(initialized).await;
        if terminal.is_none() {
            terminal = finalized.err();
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match terminal {
            None => {
                log_pipeline_operation(
                    operations::RUN_COMPLETED,
                    &self.name,
                    Some(&run_id_str),
                    None,
                    "completed",
                    Some(&format!("{input_len} elements in {elapsed_ms}ms")),
                );
            }
            Some(err) => {
                let operation = if err.is_cancelled() {
                    operations::RUN_CANCELLED
                } else {
                    operations::RUN_FAILED
                };
                log_pipeline_operation(
                    operation,
                    &self.name,
                    Some(&run_id_str),
                    None,
                    "failed",
                    Some(&err.to_string()),
                );
                // The consumer may already be gone; nothing left to notify
                let _ = sender.send(Err(err)).await;
            }
        }
    }

    /// Initialize stages in order, stopping at the first failure.
    ///
    /// Returns how many stages had `initialize` attempted alongside the outcome.
    async fn initialize_stages(&self, cancel: &CancellationToken) -> (usize, Result<()>) {
        for (index, stage) in self.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return (index, Err(self.cancelled()));
            }
            debug!(stage = %stage.name(), "Initializing stage");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return (index + 1, Err(self.cancelled())),
                result = catch_stage_panic(stage.initialize()) => result,
            };
            if let Err(e) = result {
                error!(stage = %stage.name(), error = %e, "❌ PIPELINE: Stage initialization failed");
                return (index + 1, Err(e.in_stage(stage.name(), StagePhase::Initialize)));
            }
        }
        (self.stages.len(), Ok(()))
    }

    /// Finalize the first `attempted` stages, all of them even when one fails
    async fn finalize_stages(&self, attempted: usize) -> Result<()> {
        let mut first_error = None;
        for stage in self.stages.iter().take(attempted) {
            debug!(stage = %stage.name(), "Finalizing stage");
            if let Err(e) = catch_stage_panic(stage.finalize()).await {
                error!(stage = %stage.name(), error = %e, "❌ PIPELINE: Stage finalization failed");
                // Keep finalizing the remaining stages
                first_error.get_or_insert(e.in_stage(stage.name(), StagePhase::Finalize));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Process every batch on a fresh pool, shutting the pool down afterwards
    async fn run_batches(
        &self,
        elements: Vec<T>,
        sender: &mpsc::Sender<Result<Batch<T>>>,
        cancel: &CancellationToken,
        run_id: &str,
    ) -> Result<()> {
        let pool = WorkerPool::named(
            self.name.clone(),
            self.worker_count,
            self.pool_acquire_timeout,
        )?;
        let result = self
            .process_batches(elements, &pool, sender, cancel, run_id)
            .await;

        pool.shutdown().await;
        result
    }

    async fn process_batches(
        &self,
        elements: Vec<T>,
        pool: &WorkerPool,
        sender: &mpsc::Sender<Result<Batch<T>>>,
        cancel: &CancellationToken,
        run_id: &str,
    ) -> Result<()> {
        let elements = match &self.transform {
            Some(transform) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| transform(elements))).map_err(
                    |panic| {
                        CorebitError::from_panic(panic.as_ref())
                            .in_stage(TRANSFORM_STAGE, StagePhase::Process)
                    },
                )?
            }
            None => elements,
        };
        let batches = partition(elements, self.batch_size);
        let batch_count = batches.len();
        let mut skipped: Option<CorebitError> = None;

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let batch_len = batch.len();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                result = self.run_stage_chain(index, batch, pool) => result,
            };

            match result {
                Ok(output) => {
                    let emitted = output.len();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(self.cancelled()),
                        sent = sender.send(Ok(output)) => {
                            if sent.is_err() {
                                debug!(batch_index = index, "Result consumer dropped, abandoning run");
                                return Err(self.cancelled());
                            }
                        }
                    }
                    debug!(
                        operation = operations::BATCH_EMITTED,
                        batch_index = index,
                        batch_count = batch_count,
                        input = batch_len,
                        output = emitted,
                        "Batch emitted"
                    );
                }
                Err(err) => match self.failure_policy {
                    BatchFailurePolicy::AbortRun => {
                        error!(
                            operation = operations::BATCH_FAILED,
                            batch_index = index,
                            error = %err,
                            "❌ PIPELINE: Batch failed, aborting remaining batches"
                        );
                        return Err(err);
                    }
                    BatchFailurePolicy::SkipBatch => {
                        warn!(
                            operation = operations::BATCH_FAILED,
                            batch_index = index,
                            error = %err,
                            "⚠️ PIPELINE: Batch failed, continuing with next batch"
                        );
                        skipped.get_or_insert(err);
                    }
                },
            }
        }

        let stats = pool.stats();
        info!(
            run_id = %run_id,
            batches = batch_count,
            pool_capacity = stats.capacity,
            pool_peak_active = stats.peak_active,
            pool_units = stats.submitted,
            "✅ PIPELINE: All batches processed"
        );

        skipped.map_or(Ok(()), Err)
    }

    async fn run_stage_chain(
        &self,
        index: usize,
        batch: Batch<T>,
        pool: &WorkerPool,
    ) -> Result<Batch<T>> {
        let mut current = batch;
        for stage in self.stages.iter() {
            let started = Instant::now();
            current = catch_stage_panic(stage.process(current, pool))
                .await
                .map_err(|e| e.in_stage(stage.name(), StagePhase::Process))?;
            debug!(
                stage = %stage.name(),
                batch_index = index,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage processed batch"
            );
        }
        Ok(current)
    }

    fn cancelled(&self) -> CorebitError {
        CorebitError::Cancelled {
            pipeline: self.name.clone(),
        }
    }
}

/// Everything a run produced, gathered after the stream ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome<T> {
    /// Output elements of every successfully emitted batch, in order
    pub elements: Vec<T>,
    /// Number of batches emitted
    pub batches: usize,
    /// Terminal failure or cancellation, if the run did not complete cleanly
    pub error: Option<CorebitError>,
}

impl<T> RunOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Lazily consumed, single-pass result stream of one pipeline run.
///
/// Yields one `Ok` item per batch in batch order. A run that fails or is
/// cancelled ends with exactly one `Err` item after all stages were
/// finalized. Dropping the stream cancels the run.
#[derive(Debug)]
pub struct PipelineRun<T> {
    run_id: Uuid,
    pipeline: String,
    receiver: mpsc::Receiver<Result<Batch<T>>>,
    cancel: CancellationToken,
}

impl<T> PipelineRun<T> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline
    }

    /// Request cancellation; the stream still ends with a cancellation error
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Consume the whole stream, keeping partial results alongside any error
    pub async fn drain(mut self) -> RunOutcome<T> {
        let mut outcome = RunOutcome {
            elements: Vec::new(),
            batches: 0,
            error: None,
        };
        while let Some(item) = self.next().await {
            match item {
                Ok(batch) => {
                    outcome.batches += 1;
                    outcome.elements.extend(batch);
                }
                Err(err) => outcome.error = Some(err),
            }
        }
        outcome
    }

    /// Consume the whole stream, returning every output element or the error
    pub async fn collect_elements(self) -> Result<Vec<T>> {
        let outcome = self.drain().await;
        match outcome.error {
            Some(err) => Err(err),
            None => Ok(outcome.elements),
        }
    }
}

impl<T> Stream for PipelineRun<T> {
    type Item = Result<Batch<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> Drop for PipelineRun<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
