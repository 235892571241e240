//! # Workflow Module
//!
//! Declarative pipelines: a YAML [`WorkflowDefinition`] lists named steps, and
//! a [`StageRegistry`] resolves each step's action to a [`Stage`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use corebit::workflow::{build_pipeline, StageRegistry, WorkflowDefinition};
//! use serde_json::json;
//!
//! # async fn example() -> corebit::Result<()> {
//! let definition = WorkflowDefinition::from_file("workflows/sweep.yaml")?;
//! let registry = StageRegistry::with_builtins();
//!
//! let pipeline = build_pipeline(&definition, &registry)?;
//! let elements = pipeline.call(vec![json!({"id": 1})], None).collect_elements().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Stage`]: crate::pipeline::Stage

pub mod definition;
pub mod registry;

pub use definition::{WorkflowDefinition, WorkflowSchedule, WorkflowStep};
pub use registry::{StageFactory, StageRegistry, ANNOTATE_ACTION, PASSTHROUGH_ACTION};

use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{CorebitError, Result};
use crate::pipeline::{Pipeline, Stage};
use crate::scheduler::Scheduler;

/// Resolve every step and build the pipeline with default pipeline settings
pub fn build_pipeline<T>(
    definition: &WorkflowDefinition,
    registry: &StageRegistry<T>,
) -> Result<Pipeline<T>>
where
    T: Send + 'static,
{
    build_pipeline_with_config(definition, registry, &PipelineConfig::default())
}

/// Resolve every step and build the pipeline, layering the workflow over `base`
pub fn build_pipeline_with_config<T>(
    definition: &WorkflowDefinition,
    registry: &StageRegistry<T>,
    base: &PipelineConfig,
) -> Result<Pipeline<T>>
where
    T: Send + 'static,
{
    definition.validate()?;

    let stages = definition
        .steps
        .iter()
        .map(|step| registry.create(step))
        .collect::<Result<Vec<Arc<dyn Stage<T>>>>>()?;

    info!(
        workflow = %definition.name,
        steps = stages.len(),
        "🧩 WORKFLOW: Resolved workflow steps"
    );
    Pipeline::from_config(stages, &definition.pipeline_config(base))
}

/// Build a scheduler for a workflow that declares a `schedule` block
pub fn build_scheduler<T>(
    definition: &WorkflowDefinition,
    registry: &StageRegistry<T>,
    elements: Vec<T>,
) -> Result<Scheduler<T>>
where
    T: Clone + Send + Sync + 'static,
{
    build_scheduler_with_config(definition, registry, elements, &PipelineConfig::default())
}

/// Build a scheduler, layering the workflow's pipeline settings over `base`
pub fn build_scheduler_with_config<T>(
    definition: &WorkflowDefinition,
    registry: &StageRegistry<T>,
    elements: Vec<T>,
    base: &PipelineConfig,
) -> Result<Scheduler<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let schedule = definition.schedule.as_ref().ok_or_else(|| {
        CorebitError::configuration(format!(
            "workflow '{}' has no schedule block",
            definition.name
        ))
    })?;

    let pipeline = build_pipeline_with_config(definition, registry, base)?;
    Scheduler::from_config(pipeline, &schedule.to_config(), elements)
}
