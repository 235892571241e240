//! # Worker Pool
//!
//! In-process concurrency limiter shared by the stages of a pipeline run.
//!
//! Every submitted unit of work is spawned onto the tokio runtime immediately
//! but only starts executing once it holds one of the pool's permits, so at
//! most `capacity` units are ever active at the same instant. There is no
//! priority, and a unit that fails or panics does not affect the others.
//!
//! [`WorkerPool::shutdown`] abandons the pool's remaining work: queued units
//! never start, in-flight units are dropped at their next await point, and
//! the call returns once none of them is running any more. A pipeline run
//! shuts its pool down before finalizing its stages.
//!
//! ```rust,no_run
//! use corebit::pipeline::WorkerPool;
//!
//! # async fn example() -> corebit::Result<()> {
//! let pool = WorkerPool::new(4)?;
//!
//! let lengths = pool
//!     .map_ordered(vec!["a", "bb", "ccc"], |word| async move { Ok(word.len()) })
//!     .await;
//!
//! assert_eq!(lengths.len(), 3);
//! assert!(pool.stats().peak_active <= 4);
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{CorebitError, Result};

/// Point-in-time view of pool utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    /// Units currently holding a permit
    pub active: usize,
    /// Highest number of simultaneously active units observed
    pub peak_active: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Units abandoned by a shutdown, queued or in flight
    pub cancelled: u64,
}

/// Owner name reported in cancellation errors of anonymous pools
const ANONYMOUS_OWNER: &str = "worker-pool";

#[derive(Debug)]
struct PoolInner {
    owner: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    acquire_timeout: Option<Duration>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl PoolInner {
    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let acquire = self.semaphore.clone().acquire_owned();

        let permit = match self.acquire_timeout {
            None => acquire.await,
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                warn!(
                    capacity = self.capacity,
                    waited_ms = limit.as_millis() as u64,
                    "⏳ POOL: Timed out waiting for a worker slot"
                );
                CorebitError::PoolSaturationTimeout {
                    capacity: self.capacity,
                    waited_ms: limit.as_millis() as u64,
                }
            })?,
        };

        permit.map_err(|_| CorebitError::invalid_state("worker pool semaphore closed"))
    }

    fn record_outcome(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn abandon(&self) -> CorebitError {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        CorebitError::Cancelled {
            pipeline: self.owner.clone(),
        }
    }
}

/// Tracks one active unit; decrements on drop so panics are accounted for
struct ActiveGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> ActiveGuard<'a> {
    fn enter(inner: &'a PoolInner) -> Self {
        let now_active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_active.fetch_max(now_active, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Semaphore-bounded pool of concurrently running units of work
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool allowing at most `capacity` concurrent units
    pub fn new(capacity: usize) -> Result<Self> {
        Self::named(ANONYMOUS_OWNER, capacity, None)
    }

    /// Create a pool whose units give up after waiting `timeout` for a slot
    pub fn with_acquire_timeout(capacity: usize, timeout: Duration) -> Result<Self> {
        Self::named(ANONYMOUS_OWNER, capacity, Some(timeout))
    }

    /// Create a pool owned by `owner`, the name its abandoned units report
    pub fn named(
        owner: impl Into<String>,
        capacity: usize,
        acquire_timeout: Option<Duration>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(CorebitError::configuration(
                "worker pool capacity must be at least 1",
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(CorebitError::configuration(format!(
                "worker pool capacity {capacity} exceeds the maximum of {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                owner: owner.into(),
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                acquire_timeout,
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Submit a unit of work.
    ///
    /// The unit starts as soon as a slot is free. The returned handle resolves
    /// to the unit's result; dropping it detaches the unit without stopping it.
    /// Units submitted after [`WorkerPool::shutdown`] resolve to `Cancelled`
    /// without running. Must be called within a tokio runtime.
    pub fn submit<F, R>(&self, unit: F) -> PoolHandle<R>
    where
        F: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        inner.submitted.fetch_add(1, Ordering::Relaxed);

        let task_inner = Arc::clone(&inner);
        let handle = inner.tracker.spawn(async move {
            let acquired = tokio::select! {
                biased;
                _ = task_inner.shutdown.cancelled() => return Err(task_inner.abandon()),
                acquired = task_inner.acquire() => acquired,
            };
            let _permit = match acquired {
                Ok(permit) => permit,
                Err(e) => {
                    task_inner.record_outcome(false);
                    return Err(e);
                }
            };
            let _active = ActiveGuard::enter(&task_inner);

            tokio::select! {
                biased;
                _ = task_inner.shutdown.cancelled() => Err(task_inner.abandon()),
                result = unit => {
                    task_inner.record_outcome(result.is_ok());
                    result
                }
            }
        });

        PoolHandle { handle, inner }
    }

    /// Submit a unit of work and wait for its result
    pub async fn run<F, R>(&self, unit: F) -> Result<R>
    where
        F: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(unit).await
    }

    /// Run `f` over every item through the pool, returning results in input order
    pub async fn map_ordered<I, F, Fut, R>(&self, items: Vec<I>, f: F) -> Vec<Result<R>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let handles: Vec<PoolHandle<R>> = items
            .into_iter()
            .map(|item| self.submit(f(item)))
            .collect();

        debug!(
            units = handles.len(),
            capacity = self.inner.capacity,
            "POOL: Fanned out units"
        );

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        results
    }

    /// Abandon all remaining units and wait until none of them is running.
    ///
    /// Idempotent. Abandoned units resolve to `Cancelled` naming the pool's owner.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!(
            owner = %self.inner.owner,
            cancelled = self.inner.cancelled.load(Ordering::Relaxed),
            "POOL: Shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.inner.capacity,
            active: self.inner.active.load(Ordering::SeqCst),
            peak_active: self.inner.peak_active.load(Ordering::SeqCst),
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a submitted unit of work
#[derive(Debug)]
pub struct PoolHandle<R> {
    handle: JoinHandle<Result<R>>,
    inner: Arc<PoolInner>,
}

impl<R> PoolHandle<R> {
    fn join_error(&self, err: JoinError) -> CorebitError {
        // A panicking unit never reaches record_outcome
        self.inner.record_outcome(false);
        if err.is_panic() {
            CorebitError::from_panic(err.into_panic().as_ref())
        } else {
            CorebitError::UnitPanicked {
                message: "unit of work was aborted".to_string(),
            }
        }
    }
}

impl<R> Future for PoolHandle<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(self.join_error(err))),
        }
    }
}
