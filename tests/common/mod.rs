//! Shared stages and helpers for integration tests

#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use corebit::error::{CorebitError, Result};
use corebit::pipeline::{Batch, Stage, WorkerPool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ordered record of lifecycle calls shared by several stages
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Appends a suffix to every string element and logs each lifecycle call
pub struct SuffixStage {
    name: String,
    suffix: String,
    log: CallLog,
    processed: AtomicUsize,
    fail_on_batch: Option<usize>,
    panic_on_batch: Option<usize>,
    fail_initialize: bool,
    fail_finalize: bool,
    delay: Option<Duration>,
}

impl SuffixStage {
    pub fn new(name: &str, suffix: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            suffix: suffix.to_string(),
            log: log.clone(),
            processed: AtomicUsize::new(0),
            fail_on_batch: None,
            panic_on_batch: None,
            fail_initialize: false,
            fail_finalize: false,
            delay: None,
        }
    }

    /// Fail the `batch`-th process call (1-based) of every run
    pub fn failing_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    /// Panic inside the `batch`-th process call (1-based) of every run
    pub fn panicking_on_batch(mut self, batch: usize) -> Self {
        self.panic_on_batch = Some(batch);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_stage(self) -> Arc<dyn Stage<String>> {
        Arc::new(self)
    }
}

#[async_trait]
impl Stage<String> for SuffixStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.log.record(format!("{}.initialize", self.name));
        self.processed.store(0, Ordering::SeqCst);
        if self.fail_initialize {
            return Err(CorebitError::stage(&self.name, "device not ready"));
        }
        Ok(())
    }

    async fn process(&self, batch: Batch<String>, _pool: &WorkerPool) -> Result<Batch<String>> {
        let call = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.record(format!("{}.process", self.name));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_batch == Some(call) {
            panic!("{} lost its adapter on batch {call}", self.name);
        }
        if self.fail_on_batch == Some(call) {
            return Err(CorebitError::stage(
                &self.name,
                format!("rejected batch {call}"),
            ));
        }
        Ok(batch
            .into_iter()
            .map(|element| format!("{element}{}", self.suffix))
            .collect())
    }

    async fn finalize(&self) -> Result<()> {
        self.log.record(format!("{}.finalize", self.name));
        if self.fail_finalize {
            return Err(CorebitError::stage(&self.name, "flush failed"));
        }
        Ok(())
    }
}

/// Fans every element out through the pool and tracks the peak unit concurrency
#[derive(Default)]
pub struct ConcurrencyProbe {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage<u32> for ConcurrencyProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn process(&self, batch: Batch<u32>, pool: &WorkerPool) -> Result<Batch<u32>> {
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);
        let results = pool
            .map_ordered(batch, move |element| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(element)
                }
            })
            .await;
        results.into_iter().collect()
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
