//! Main orchestrator for pipeline execution.
//!
//! Runs a pipeline's stages in order against one shared context, gating each
//! stage on the context, retrying thrown faults, and persisting the run's
//! trace exactly once however the run ends.

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Context, TraceBuffer};

use super::pipeline::{Pipeline, StageDescriptor};
use super::retry::{self, RetryPolicy};
use super::trace_log::{TraceJournal, TraceLog};

/// Main pipeline orchestrator.
///
/// Holds no per-run state, so one instance may drive several runs
/// concurrently.
#[derive(Debug)]
pub struct Orchestrator {
    pipeline: Pipeline,
    log: TraceLog,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Create an orchestrator with the default retry policy
    pub fn new(pipeline: Pipeline, log: TraceLog) -> Self {
        Self {
            pipeline,
            log,
            retry: RetryPolicy::default(),
        }
    }

    /// Policy for stages without their own override
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn trace_log(&self) -> &TraceLog {
        &self.log
    }

    /// Execute the pipeline for one input and return the final context.
    ///
    /// Never fails: faults surface as `state = ERROR` with the error text
    /// under `pipeline_error`.
    #[instrument(skip(self, input), fields(pipeline = %self.pipeline.name(), run_id = tracing::field::Empty))]
    pub async fn run(&self, input: impl Into<String>) -> Context {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!("Starting pipeline execution");

        let mut context = Context::new(input);
        let mut journal = TraceJournal::new(&self.log);

        self.drive(&mut context, &mut journal).await;
        journal.finish();

        if let Some(err) = context.error() {
            error!(state = %context.state(), error = %err, "Run failed");
        } else {
            info!(state = %context.state(), "Run completed");
        }

        context
    }

    async fn drive(&self, context: &mut Context, journal: &mut TraceJournal<'_>) {
        for descriptor in self.pipeline.stages() {
            if context.state().is_error() {
                break;
            }

            if !descriptor.gate().allows(context) {
                let message = format!(
                    "gate for stage '{}' ({}) rejected state {}",
                    descriptor.name(),
                    descriptor.gate().description(),
                    context.state()
                );
                warn!(stage = descriptor.name(), %message, "Gate closed, aborting run");
                context.fail(message);
                break;
            }

            self.run_stage(descriptor, context, journal).await;
        }
    }

    async fn run_stage(
        &self,
        descriptor: &StageDescriptor,
        context: &mut Context,
        journal: &mut TraceJournal<'_>,
    ) {
        let policy = descriptor.retry_policy().unwrap_or(&self.retry);
        let mut trace = TraceBuffer::for_stage(descriptor.name());

        debug!(stage = descriptor.name(), "Executing stage");
        let result = retry::invoke(descriptor.stage(), context, policy, &mut trace).await;
        journal.absorb(trace);

        match result {
            Ok(attempted) => {
                let rejected = attempted.value.is_rejection();
                context.merge(attempted.value);
                if rejected {
                    warn!(
                        stage = descriptor.name(),
                        attempts = attempted.attempts,
                        "Stage rejected its output"
                    );
                } else {
                    info!(
                        stage = descriptor.name(),
                        attempts = attempted.attempts,
                        state = %context.state(),
                        "Stage completed"
                    );
                }
            }
            Err(exhausted) => {
                error!(
                    stage = descriptor.name(),
                    attempts = exhausted.attempts,
                    error = %exhausted.message,
                    "Stage failed permanently"
                );
                context.fail(exhausted.to_string());
            }
        }
    }
}
