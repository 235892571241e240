//! # Scheduler Service
//!
//! Re-triggers one pipeline over a fixed element set on a recurring schedule.
//!
//! ## State machine
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──────────────▶ Stopped
//!                      │
//!                      └──cap reached / schedule over──▶ Exhausted
//! ```
//!
//! At most one triggered run is in progress at any time. Triggers that fire
//! while a run is active are handled by the [`OverlapPolicy`]: `Queue` keeps a
//! single pending run that starts as soon as the active one completes (further
//! overlapping triggers are coalesced into it), `Drop` discards them with an
//! overlap diagnostic. The iteration cap counts completed runs.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::trigger::{CronTrigger, Trigger};
use crate::config::{OverlapPolicy, SchedulerConfig};
use crate::constants::operations;
use crate::error::{CorebitError, Result};
use crate::logging::log_scheduler_operation;
use crate::pipeline::{Pipeline, RunOutcome};

/// Lifecycle state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
    Exhausted,
}

impl SchedulerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Stopped | SchedulerState::Exhausted)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Counters describing scheduler activity so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Trigger firings observed
    pub fired: u64,
    /// Pipeline runs started
    pub started: u64,
    /// Pipeline runs that ran to completion, successfully or not
    pub completed: u64,
    /// Completed runs that ended with an error
    pub failed: u64,
    /// Firings discarded under `OverlapPolicy::Drop`
    pub dropped: u64,
    /// Firings merged into an already pending run under `OverlapPolicy::Queue`
    pub coalesced: u64,
    pub last_error: Option<String>,
}

/// Cron-driven re-execution of one pipeline
pub struct Scheduler<T> {
    pipeline: Pipeline<T>,
    elements: Arc<[T]>,
    iteration_cap: Option<u64>,
    overlap_policy: OverlapPolicy,
    trigger_description: String,
    trigger: Mutex<Option<Box<dyn Trigger>>>,
    state: Arc<watch::Sender<SchedulerState>>,
    stats: Arc<Mutex<SchedulerStats>>,
    stop: CancellationToken,
}

impl<T> fmt::Debug for Scheduler<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pipeline", &self.pipeline.name())
            .field("trigger", &self.trigger_description)
            .field("iteration_cap", &self.iteration_cap)
            .field("overlap_policy", &self.overlap_policy)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<T> Scheduler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a scheduler firing on `cron_expression`.
    ///
    /// Malformed expressions and a zero iteration cap are configuration errors.
    pub fn new(
        pipeline: Pipeline<T>,
        cron_expression: &str,
        elements: Vec<T>,
        iteration_cap: Option<u64>,
    ) -> Result<Self> {
        let trigger = CronTrigger::parse(cron_expression)?;
        Self::with_trigger(pipeline, Box::new(trigger), elements, iteration_cap)
    }

    /// Create a scheduler driven by any [`Trigger`]
    pub fn with_trigger(
        pipeline: Pipeline<T>,
        trigger: Box<dyn Trigger>,
        elements: Vec<T>,
        iteration_cap: Option<u64>,
    ) -> Result<Self> {
        if iteration_cap == Some(0) {
            return Err(CorebitError::configuration(
                "scheduler iteration cap must be at least 1",
            ));
        }

        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            pipeline,
            elements: elements.into(),
            iteration_cap,
            overlap_policy: OverlapPolicy::default(),
            trigger_description: trigger.describe(),
            trigger: Mutex::new(Some(trigger)),
            state: Arc::new(state),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            stop: CancellationToken::new(),
        })
    }

    /// Create a scheduler from loaded configuration; `config.cron` is required
    pub fn from_config(
        pipeline: Pipeline<T>,
        config: &SchedulerConfig,
        elements: Vec<T>,
    ) -> Result<Self> {
        let cron = config.cron.as_deref().ok_or_else(|| {
            CorebitError::configuration("scheduler.cron is required to build a scheduler")
        })?;
        Ok(Self::new(pipeline, cron, elements, config.iteration_cap)?
            .with_overlap_policy(config.overlap_policy))
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn pipeline(&self) -> &Pipeline<T> {
        &self.pipeline
    }

    pub fn iteration_cap(&self) -> Option<u64> {
        self.iteration_cap
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    /// Start firing. Only valid once, from `Idle`, within a tokio runtime.
    ///
    /// Returns immediately; runs execute on background tasks.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            CorebitError::invalid_state(format!(
                "scheduler for pipeline '{}' must be started within a tokio runtime",
                self.pipeline.name()
            ))
        })?;

        let started = self.state.send_if_modified(|state| {
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(CorebitError::invalid_state(format!(
                "scheduler for pipeline '{}' cannot start from state {}",
                self.pipeline.name(),
                self.state()
            )));
        }

        let trigger = self.trigger.lock().take().ok_or_else(|| {
            CorebitError::invalid_state("scheduler trigger was already consumed")
        })?;

        log_scheduler_operation(
            operations::SCHEDULER_STARTED,
            self.pipeline.name(),
            &self.trigger_description,
            0,
            self.iteration_cap
                .map(|cap| format!("iteration cap {cap}"))
                .as_deref(),
        );

        let driver = Driver {
            pipeline: self.pipeline.clone(),
            elements: Arc::clone(&self.elements),
            iteration_cap: self.iteration_cap,
            overlap_policy: self.overlap_policy,
            trigger_description: self.trigger_description.clone(),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            stop: self.stop.clone(),
        };
        let span = tracing::info_span!("scheduler", pipeline = %self.pipeline.name());
        runtime.spawn(driver.run(trigger).instrument(span));

        Ok(())
    }

    /// Request a stop. An in-flight run is cancelled and still finalizes.
    pub fn stop(&self) {
        // Never started: there is no driver to publish the transition
        self.state.send_if_modified(|state| {
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Stopped;
                true
            } else {
                false
            }
        });
        self.stop.cancel();
    }

    /// Wait until the scheduler reaches `Stopped` or `Exhausted`
    pub async fn wait(&self) -> Result<SchedulerState> {
        let mut receiver = self.state.subscribe();
        if *receiver.borrow() == SchedulerState::Idle {
            return Err(CorebitError::invalid_state(
                "scheduler has not been started",
            ));
        }
        let state = receiver
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| CorebitError::invalid_state("scheduler state channel closed"))?;
        Ok(*state)
    }

    /// Stop and wait for the in-flight run, if any, to finish finalizing
    pub async fn shutdown(&self) -> Result<SchedulerState> {
        self.stop();
        self.wait().await
    }
}

impl<T> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Summary of one triggered run
struct RunReport {
    batches: usize,
    elements: usize,
    error: Option<CorebitError>,
}

impl<T> From<RunOutcome<T>> for RunReport {
    fn from(outcome: RunOutcome<T>) -> Self {
        Self {
            batches: outcome.batches,
            elements: outcome.elements.len(),
            error: outcome.error,
        }
    }
}

/// Background loop owning the trigger and the single active run
struct Driver<T> {
    pipeline: Pipeline<T>,
    elements: Arc<[T]>,
    iteration_cap: Option<u64>,
    overlap_policy: OverlapPolicy,
    trigger_description: String,
    state: Arc<watch::Sender<SchedulerState>>,
    stats: Arc<Mutex<SchedulerStats>>,
    stop: CancellationToken,
}

impl<T> Driver<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(self, mut trigger: Box<dyn Trigger>) {
        let mut active: Option<JoinHandle<RunReport>> = None;
        let mut pending = false;
        let mut schedule_over = false;

        let final_state = loop {
            if schedule_over && active.is_none() {
                break SchedulerState::Exhausted;
            }

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break SchedulerState::Stopped,
                joined = wait_for_run(&mut active) => {
                    active = None;
                    let completed = self.record_completion(joined);
                    if self.iteration_cap.is_some_and(|cap| completed >= cap) {
                        break SchedulerState::Exhausted;
                    }
                    if pending {
                        pending = false;
                        active = Some(self.spawn_run());
                    }
                }
                tick = trigger.tick(), if !schedule_over => match tick {
                    None => {
                        info!(trigger = %self.trigger_description, "Trigger has no further firings");
                        schedule_over = true;
                        pending = false;
                    }
                    Some(_) => self.on_tick(&mut active, &mut pending),
                },
            }
        };

        if let Some(handle) = active.take() {
            // Cancelled through the stop token; wait for its finalize calls
            match handle.await {
                Ok(report) => info!(
                    batches = report.batches,
                    error = ?report.error,
                    "In-flight run ended after stop"
                ),
                Err(e) => error!(error = %e, "In-flight run task failed after stop"),
            }
        }

        let completed = self.stats.lock().completed;
        let operation = match final_state {
            SchedulerState::Exhausted => operations::SCHEDULER_EXHAUSTED,
            _ => operations::SCHEDULER_STOPPED,
        };
        log_scheduler_operation(
            operation,
            self.pipeline.name(),
            &self.trigger_description,
            completed,
            None,
        );
        self.state.send_replace(final_state);
    }

    fn on_tick(&self, active: &mut Option<JoinHandle<RunReport>>, pending: &mut bool) {
        let completed = {
            let mut stats = self.stats.lock();
            stats.fired += 1;
            stats.completed
        };

        if active.is_none() {
            log_scheduler_operation(
                operations::SCHEDULER_TRIGGER,
                self.pipeline.name(),
                &self.trigger_description,
                completed,
                None,
            );
            *active = Some(self.spawn_run());
            return;
        }

        match self.overlap_policy {
            OverlapPolicy::Queue => {
                if *pending {
                    self.stats.lock().coalesced += 1;
                } else {
                    *pending = true;
                }
                log_scheduler_operation(
                    operations::SCHEDULER_TRIGGER_QUEUED,
                    self.pipeline.name(),
                    &self.trigger_description,
                    completed,
                    Some("run in progress; will start when it completes"),
                );
            }
            OverlapPolicy::Drop => {
                self.stats.lock().dropped += 1;
                let diagnostic = CorebitError::SchedulerOverlap {
                    pipeline: self.pipeline.name().to_string(),
                };
                warn!(
                    operation = operations::SCHEDULER_TRIGGER_DROPPED,
                    error = %diagnostic,
                    "⚠️ SCHEDULER: Trigger dropped"
                );
            }
        }
    }

    fn spawn_run(&self) -> JoinHandle<RunReport> {
        self.stats.lock().started += 1;
        let run = self
            .pipeline
            .call(self.elements.to_vec(), Some(self.stop.child_token()));
        tokio::spawn(async move { RunReport::from(run.drain().await) })
    }

    /// Record a finished run and return the completed-run count
    fn record_completion(
        &self,
        joined: std::result::Result<RunReport, tokio::task::JoinError>,
    ) -> u64 {
        let mut stats = self.stats.lock();
        stats.completed += 1;

        let error = match joined {
            Ok(report) => {
                info!(
                    batches = report.batches,
                    elements = report.elements,
                    completed = stats.completed,
                    "✅ SCHEDULER: Triggered run completed"
                );
                report.error.map(|e| e.to_string())
            }
            Err(e) => Some(format!("run task failed: {e}")),
        };

        if let Some(message) = error {
            error!(error = %message, completed = stats.completed, "❌ SCHEDULER: Triggered run failed");
            stats.failed += 1;
            stats.last_error = Some(message);
        }
        stats.completed
    }
}

/// Resolve when the active run finishes; pend forever when there is none
async fn wait_for_run(
    active: &mut Option<JoinHandle<RunReport>>,
) -> std::result::Result<RunReport, tokio::task::JoinError> {
    match active {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
