//! Pipeline definitions.
//!
//! A pipeline is a fixed, ordered list of stage descriptors. Each descriptor
//! pairs a stage with the gate that must hold before it runs.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::retry::RetryPolicy;
use super::stage::{Gate, Stage};

/// A complete pipeline definition
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDescriptor>,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptors in execution order
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// A single step in a pipeline. Immutable once built.
pub struct StageDescriptor {
    name: String,
    gate: Gate,
    stage: Arc<dyn Stage>,
    retry_policy: Option<RetryPolicy>,
}

impl StageDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    /// Per-stage override of the executor's retry policy
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("gate", &self.gate)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Builder collecting descriptors in order
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDescriptor>,
}

impl PipelineBuilder {
    /// Append a stage using the executor's retry policy
    pub fn stage(self, name: impl Into<String>, gate: Gate, stage: impl Stage + 'static) -> Self {
        self.push(name.into(), gate, Arc::new(stage), None)
    }

    /// Append a stage with its own retry policy
    pub fn stage_with_retry(
        self,
        name: impl Into<String>,
        gate: Gate,
        stage: impl Stage + 'static,
        retry_policy: RetryPolicy,
    ) -> Self {
        self.push(name.into(), gate, Arc::new(stage), Some(retry_policy))
    }

    fn push(
        mut self,
        name: String,
        gate: Gate,
        stage: Arc<dyn Stage>,
        retry_policy: Option<RetryPolicy>,
    ) -> Self {
        self.stages.push(StageDescriptor {
            name,
            gate,
            stage,
            retry_policy,
        });
        self
    }

    /// Validate and freeze the pipeline
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::EmptyName);
        }

        if self.stages.is_empty() {
            return Err(PipelineError::NoStages {
                pipeline: self.name,
            });
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.name.is_empty() {
                return Err(PipelineError::EmptyStageName { index });
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::DuplicateStage {
                    name: stage.name.clone(),
                });
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}

/// Pipeline definition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Pipeline name cannot be empty")]
    EmptyName,

    #[error("Pipeline '{pipeline}' must have at least one stage")]
    NoStages { pipeline: String },

    #[error("Stage {index} has an empty name")]
    EmptyStageName { index: usize },

    #[error("Stage '{name}' is defined more than once")]
    DuplicateStage { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    use crate::domain::{Context, StageOutput, State, TraceBuffer};

    struct Noop;

    #[async_trait]
    impl Stage for Noop {
        async fn process(&self, _context: &Context, _trace: &mut TraceBuffer) -> Result<StageOutput> {
            Ok(StageOutput::new(State::Finished))
        }
    }

    #[test]
    fn test_pipeline_keeps_order() {
        let pipeline = Pipeline::builder("test")
            .stage("first", Gate::always(), Noop)
            .stage_with_retry(
                "second",
                Gate::state_is(State::Finished),
                Noop,
                RetryPolicy::with_max_attempts(5),
            )
            .build()
            .unwrap();

        let names: Vec<&str> = pipeline.stages().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(pipeline.stages()[0].retry_policy().is_none());
        assert_eq!(pipeline.stages()[1].retry_policy().unwrap().max_attempts, 5);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = Pipeline::builder("empty").build().unwrap_err();
        assert_eq!(
            err,
            PipelineError::NoStages {
                pipeline: "empty".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = Pipeline::builder("dup")
            .stage("same", Gate::always(), Noop)
            .stage("same", Gate::always(), Noop)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStage { .. }));
    }

    #[test]
    fn test_empty_stage_name_rejected() {
        let err = Pipeline::builder("p")
            .stage("", Gate::always(), Noop)
            .build()
            .unwrap_err();
        assert_eq!(err, PipelineError::EmptyStageName { index: 0 });
    }
}
