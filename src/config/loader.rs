//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers an optional file (format
//! inferred from its extension) under `COREBIT__*` environment overrides and
//! validates the merged result.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::CorebitConfig;
use crate::constants::env as env_vars;
use crate::error::{CorebitError, Result};

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: CorebitConfig,
    environment: String,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from a file, with environment overrides applied on top
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CorebitError::configuration(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        Self::build(Some(path.to_path_buf()))
    }

    /// Load configuration from `COREBIT_CONFIG` (if set) and environment overrides
    pub fn load_from_env() -> Result<Arc<ConfigManager>> {
        match env::var(env_vars::CONFIG_FILE) {
            Ok(path) if !path.trim().is_empty() => Self::load(path),
            _ => Self::build(None),
        }
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: CorebitConfig) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source: None,
        }))
    }

    fn build(source: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        debug!(
            environment = %environment,
            source = ?source,
            "Loading configuration"
        );

        let mut builder = Config::builder();
        if let Some(path) = &source {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_vars::CONFIG_PREFIX)
                .separator(env_vars::CONFIG_SEPARATOR)
                .try_parsing(true),
        );

        let config: CorebitConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            pipeline = %config.pipeline.name,
            batch_size = config.pipeline.batch_size,
            worker_count = config.pipeline.worker_count,
            cron = ?config.scheduler.cron,
            "⚙️ CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source,
        }))
    }

    /// Detect the deployment environment from environment variables
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var(env_vars::FALLBACK_ENVIRONMENT))
            .unwrap_or_else(|_| "development".to_string())
    }

    pub fn config(&self) -> &CorebitConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchFailurePolicy, OverlapPolicy};
    use std::io::Write;

    fn write_config(extension: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_toml_file() {
        let file = write_config(
            ".toml",
            r#"
[pipeline]
name = "pairing"
batch_size = 4
worker_count = 8
pool_acquire_timeout_ms = 250
failure_policy = "skip_batch"

[scheduler]
cron = "*/10 * * * * *"
iteration_cap = 3
overlap_policy = "drop"
"#,
        );

        let manager = ConfigManager::load(file.path()).unwrap();
        let config = manager.config();

        assert_eq!(config.pipeline.name, "pairing");
        assert_eq!(config.pipeline.batch_size, 4);
        assert_eq!(config.pipeline.worker_count, 8);
        assert_eq!(
            config.pipeline.pool_acquire_timeout(),
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(config.pipeline.failure_policy, BatchFailurePolicy::SkipBatch);
        assert_eq!(config.scheduler.cron.as_deref(), Some("*/10 * * * * *"));
        assert_eq!(config.scheduler.iteration_cap, Some(3));
        assert_eq!(config.scheduler.overlap_policy, OverlapPolicy::Drop);
        assert_eq!(manager.source(), Some(file.path()));
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let file = write_config(
            ".yaml",
            r#"
pipeline:
  batch_size: 2
"#,
        );

        let manager = ConfigManager::load(file.path()).unwrap();
        assert_eq!(manager.config().pipeline.batch_size, 2);
        assert_eq!(manager.config().pipeline.name, "pipeline");
        assert_eq!(manager.config().scheduler.cron, None);
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let file = write_config(
            ".toml",
            r#"
[scheduler]
iteration_cap = 0
"#,
        );

        let err = ConfigManager::load(file.path()).unwrap_err();
        assert!(matches!(err, CorebitError::Configuration { .. }));
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let err = ConfigManager::load("/nonexistent/corebit.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn from_config_validates() {
        let mut config = CorebitConfig::default();
        assert!(ConfigManager::from_config(config.clone()).is_ok());

        config.scheduler.iteration_cap = Some(0);
        assert!(ConfigManager::from_config(config).is_err());
    }
}
