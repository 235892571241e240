//! # Triggers
//!
//! Sources of scheduler firings. [`CronTrigger`] follows a cron expression;
//! [`IntervalTrigger`] fires at a fixed period.
//!
//! Triggers measure time with `tokio::time`, so they respect a paused test
//! clock. A cron schedule is anchored to wall-clock time on its first tick and
//! advanced from there with the runtime's monotonic clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::error::{CorebitError, Result};

/// A recurring source of firings
#[async_trait]
pub trait Trigger: Send {
    /// Wait for the next firing and return its 1-based sequence number.
    ///
    /// Returns `None` once the schedule has no further firings. Dropping the
    /// returned future before it completes must not consume a firing.
    async fn tick(&mut self) -> Option<u64>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Normalize a cron expression to the seconds-first form.
///
/// Classic 5-field expressions get a leading `0` seconds field; 6 and 7 field
/// expressions and `@` shorthands pass through unchanged.
pub fn normalize_cron_expression(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(CorebitError::configuration("cron expression is empty"));
    }
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        count => Err(CorebitError::configuration(format!(
            "cron expression '{trimmed}' has {count} fields; expected 5, 6 or 7"
        ))),
    }
}

/// Fires according to a cron schedule
#[derive(Debug)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    /// Monotonic instant and wall-clock time captured on the first tick
    anchor: Option<(Instant, DateTime<Utc>)>,
    /// Schedule position; the next firing is the first one after it
    cursor: Option<DateTime<Utc>>,
    fired: u64,
}

impl CronTrigger {
    /// Parse a cron expression, rejecting malformed ones as configuration errors
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize_cron_expression(expression)?;
        let schedule = Schedule::from_str(&normalized)?;

        Ok(Self {
            expression: normalized,
            schedule,
            anchor: None,
            cursor: None,
            fired: 0,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn wall_clock(anchor: (Instant, DateTime<Utc>), at: Instant) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(at.saturating_duration_since(anchor.0))
            .unwrap_or_else(|_| chrono::Duration::zero());
        anchor.1 + elapsed
    }
}

#[async_trait]
impl Trigger for CronTrigger {
    async fn tick(&mut self) -> Option<u64> {
        let anchor = *self.anchor.get_or_insert_with(|| (Instant::now(), Utc::now()));
        let cursor = *self.cursor.get_or_insert(anchor.1);

        let next = self.schedule.after(&cursor).next()?;
        let offset = (next - anchor.1).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep_until(anchor.0 + offset).await;

        // Continue from the actual firing time so late ticks skip missed slots
        self.cursor = Some(next.max(Self::wall_clock(anchor, Instant::now())));
        self.fired += 1;
        debug!(expression = %self.expression, scheduled_for = %next, tick = self.fired, "Cron trigger fired");
        Some(self.fired)
    }

    fn describe(&self) -> String {
        format!("cron({})", self.expression)
    }
}

/// Fires every `period`, starting one period after the first tick is awaited
#[derive(Debug)]
pub struct IntervalTrigger {
    period: Duration,
    interval: Option<Interval>,
    fired: u64,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(CorebitError::configuration(
                "interval trigger period must be greater than zero",
            ));
        }
        Ok(Self {
            period,
            interval: None,
            fired: 0,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn tick(&mut self) -> Option<u64> {
        let period = self.period;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
        self.fired += 1;
        Some(self.fired)
    }

    fn describe(&self) -> String {
        format!("every {}ms", self.period.as_millis())
    }
}
