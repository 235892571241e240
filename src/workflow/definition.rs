//! # Workflow Definitions
//!
//! YAML documents naming a pipeline, its ordered steps and, optionally, the
//! schedule it runs on.
//!
//! ```yaml
//! name: sensor-sweep
//! batch_size: 50
//! worker_count: 4
//! schedule:
//!   cron: "*/10 * * * * *"
//!   iteration_cap: 6
//!   overlap_policy: drop
//! steps:
//!   - name: tag-site
//!     action: annotate
//!     input:
//!       site: north-field
//!   - name: forward
//!     action: passthrough
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::config::{OverlapPolicy, PipelineConfig, SchedulerConfig};
use crate::error::{CorebitError, Result};

/// One named step resolved to a stage through the registry by its `action`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowStep {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
}

/// Recurring execution block of a workflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowSchedule {
    pub cron: String,
    #[serde(default)]
    pub iteration_cap: Option<u64>,
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,
}

impl WorkflowSchedule {
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cron: Some(self.cron.clone()),
            iteration_cap: self.iteration_cap,
            overlap_policy: self.overlap_policy,
        }
    }
}

/// A complete workflow document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    /// Falls back to the pipeline configuration when absent
    #[serde(default)]
    pub batch_size: Option<i64>,
    /// Falls back to the pipeline configuration when absent
    #[serde(default)]
    pub worker_count: Option<i64>,
    #[serde(default)]
    pub schedule: Option<WorkflowSchedule>,
}

impl WorkflowDefinition {
    /// Parse and validate a workflow from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Read, parse and validate a workflow file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            CorebitError::configuration(format!(
                "failed to read workflow file {}: {e}",
                path.display()
            ))
        })?;

        let definition = Self::from_yaml_str(&contents)?;
        debug!(
            workflow = %definition.name,
            steps = definition.steps.len(),
            path = %path.display(),
            "Loaded workflow definition"
        );
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CorebitError::configuration("workflow name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(CorebitError::configuration(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(CorebitError::configuration(format!(
                    "workflow '{}' step #{} has an empty name",
                    self.name,
                    index + 1
                )));
            }
            if step.action.trim().is_empty() {
                return Err(CorebitError::configuration(format!(
                    "workflow '{}' step '{}' has an empty action",
                    self.name, step.name
                )));
            }
        }

        if let Some(schedule) = &self.schedule {
            if schedule.cron.trim().is_empty() {
                return Err(CorebitError::configuration(format!(
                    "workflow '{}' schedule has an empty cron expression",
                    self.name
                )));
            }
            if schedule.iteration_cap == Some(0) {
                return Err(CorebitError::configuration(format!(
                    "workflow '{}' schedule iteration_cap must be at least 1",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Pipeline settings for this workflow layered over `base`
    pub fn pipeline_config(&self, base: &PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            worker_count: self.worker_count.unwrap_or(base.worker_count),
            ..base.clone()
        }
    }
}
