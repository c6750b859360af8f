//! Domain types for the stage pipeline.
//!
//! This module contains the core data structures:
//! - State: The pipeline's state tags
//! - Context: Shared key/value store and stage outputs
//! - Trace: Immutable trace entries and per-stage buffers

pub mod context;
pub mod state;
pub mod trace;

// Re-export commonly used types
pub use context::{Context, StageOutput, ERROR_KEY, STATE_KEY, USER_INPUT_KEY};
pub use state::State;
pub use trace::{Opaque, TraceBuffer, TraceEntry, TraceKind, TraceValue};
