//! # Structured Logging Module
//!
//! Environment-aware structured logging for pipeline runs and scheduler
//! activity. Console output by default, JSON when `COREBIT_LOG_FORMAT=json`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::env as env_vars;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber.
/// `RUST_LOG` takes precedence over the per-environment default level.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var(env_vars::LOG_FORMAT)
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Embedding applications may already have installed a subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env_vars::ENVIRONMENT)
        .or_else(|_| std::env::var(env_vars::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for pipeline run operations
pub fn log_pipeline_operation(
    operation: &str,
    pipeline: &str,
    run_id: Option<&str>,
    batch_index: Option<usize>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        pipeline = %pipeline,
        run_id = run_id,
        batch_index = batch_index,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 PIPELINE_OPERATION"
    );
}

/// Log structured data for scheduler operations
pub fn log_scheduler_operation(
    operation: &str,
    pipeline: &str,
    trigger: &str,
    completed_runs: u64,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        pipeline = %pipeline,
        trigger = %trigger,
        completed_runs = completed_runs,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "⏰ SCHEDULER_OPERATION"
    );
}
