//! # Scheduler Module
//!
//! Recurring execution of a pipeline on a cron-style schedule.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use corebit::pipeline::{ParallelMapStage, Pipeline, Stage};
//! use corebit::scheduler::{Scheduler, SchedulerState};
//! use std::sync::Arc;
//!
//! # async fn example() -> corebit::Result<()> {
//! let stamp: Arc<dyn Stage<String>> =
//!     Arc::new(ParallelMapStage::new("stamp", |s: String| async move { Ok(s + "!") }));
//! let pipeline = Pipeline::new("stamper", vec![stamp], 10, 0)?;
//!
//! // Every 30 seconds, three completed runs at most
//! let scheduler = Scheduler::new(pipeline, "*/30 * * * * *", vec!["ping".to_string()], Some(3))?;
//! scheduler.start()?;
//!
//! assert_eq!(scheduler.wait().await?, SchedulerState::Exhausted);
//! # Ok(())
//! # }
//! ```

pub mod service;
pub mod trigger;

pub use crate::config::OverlapPolicy;
pub use service::{Scheduler, SchedulerState, SchedulerStats};
pub use trigger::{normalize_cron_expression, CronTrigger, IntervalTrigger, Trigger};
