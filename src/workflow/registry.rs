//! # Stage Registry
//!
//! Maps workflow step actions to factories producing [`Stage`] instances.
//!
//! Factories receive the whole [`WorkflowStep`], so one action can back many
//! differently configured steps. Lookups of unregistered actions fail with a
//! configuration error naming the action.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::definition::WorkflowStep;
use crate::error::{CorebitError, Result};
use crate::pipeline::{ParallelMapStage, Stage};

/// Builds a stage for one workflow step
pub type StageFactory<T> = Arc<dyn Fn(&WorkflowStep) -> Result<Arc<dyn Stage<T>>> + Send + Sync>;

/// Action name passing batches through unchanged
pub const PASSTHROUGH_ACTION: &str = "passthrough";
/// Action name merging the step input into every object element
pub const ANNOTATE_ACTION: &str = "annotate";

/// Registry of stage factories keyed by action name
pub struct StageRegistry<T> {
    factories: HashMap<String, StageFactory<T>>,
}

impl<T> Default for StageRegistry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for StageRegistry<T>
where
    T: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

impl<T> StageRegistry<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `action`, replacing any earlier registration
    pub fn register<F>(&mut self, action: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&WorkflowStep) -> Result<Arc<dyn Stage<T>>> + Send + Sync + 'static,
    {
        let action = action.into();
        debug!(action = %action, "Registered stage factory");
        self.factories.insert(action, Arc::new(factory));
        self
    }

    pub fn contains(&self, action: &str) -> bool {
        self.factories.contains_key(action)
    }

    /// Registered action names, sorted
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Build the stage for `step`
    pub fn create(&self, step: &WorkflowStep) -> Result<Arc<dyn Stage<T>>> {
        let factory = self.factories.get(&step.action).ok_or_else(|| {
            CorebitError::configuration(format!(
                "unknown action '{}' in step '{}'",
                step.action, step.name
            ))
        })?;
        factory(step)
    }
}

impl StageRegistry<Value> {
    /// Registry preloaded with the `passthrough` and `annotate` actions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PASSTHROUGH_ACTION, |step| {
            let stage = ParallelMapStage::new(step.name.clone(), |element: Value| async move {
                Ok(element)
            });
            Ok(Arc::new(stage) as Arc<dyn Stage<Value>>)
        });
        registry.register(ANNOTATE_ACTION, annotate_stage);
        registry
    }
}

fn annotate_stage(step: &WorkflowStep) -> Result<Arc<dyn Stage<Value>>> {
    let fields = Arc::new(step.input.clone());
    let stage_name = step.name.clone();

    let stage = ParallelMapStage::new(step.name.clone(), move |element: Value| {
        let fields = Arc::clone(&fields);
        let stage_name = stage_name.clone();
        async move {
            match element {
                Value::Object(mut object) => {
                    for (key, value) in fields.iter() {
                        object.insert(key.clone(), value.clone());
                    }
                    Ok(Value::Object(object))
                }
                other => Err(CorebitError::stage(
                    stage_name,
                    format!("annotate expects object elements, got {other}"),
                )),
            }
        }
    });
    Ok(Arc::new(stage) as Arc<dyn Stage<Value>>)
}
