//! Core orchestration logic.
//!
//! This module contains:
//! - Stage: The stage contract and gates
//! - Pipeline: Ordered, validated stage descriptors
//! - Retry: Bounded retries around stage invocations
//! - Sanitize: Safe serialization of trace entries
//! - TraceLog: Append-only JSONL trace persistence
//! - Orchestrator: Main execution engine

pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod sanitize;
pub mod stage;
pub mod trace_log;

// Re-export commonly used types
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, StageDescriptor};
pub use retry::{Attempted, RetriesExhausted, RetryPolicy};
pub use sanitize::{encode_entry, Encoded};
pub use stage::{Gate, Stage, StageOutput};
pub use trace_log::{AppendReport, LoggedRecord, TraceJournal, TraceLog};
