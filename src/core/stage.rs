//! The stage contract and gate predicates.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Context, State, TraceBuffer};

pub use crate::domain::StageOutput;

/// One unit of pipeline work.
///
/// Implementations read the context and return a partial result; they never
/// mutate the context or write to persistent storage themselves.
///
/// Two failure channels, handled differently by the executor:
/// - `Ok(output)` with `output.state == State::Error` is a self-reported
///   rejection. It is merged and ends the run without a retry.
/// - `Err(_)` is a transient fault. The retry wrapper invokes the stage again
///   until the attempt bound is reached.
///
/// A stage may be invoked more than once with the same context and must be
/// safe to re-run.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput>;
}

type Predicate = dyn Fn(&Context) -> bool + Send + Sync;

/// Precondition evaluated against the current context before a stage runs
pub struct Gate {
    predicate: Box<Predicate>,
    description: String,
}

impl Gate {
    /// Gate from an arbitrary predicate
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            description: description.into(),
        }
    }

    /// Gate that always opens
    pub fn always() -> Self {
        Self::new("always", |_| true)
    }

    /// Gate that opens only when the context is in `state`
    pub fn state_is(state: State) -> Self {
        Self::new(format!("state == {}", state), move |ctx| ctx.state() == state)
    }

    pub fn allows(&self, context: &Context) -> bool {
        (self.predicate)(context)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("description", &self.description)
            .finish()
    }
}
