//! stagewright - Gated, retrying stage pipeline for text-generation workflows
//!
//! Runs an ordered list of stages against one shared context. Each stage is
//! gated on the context, retried on thrown faults, and leaves trace entries
//! that are persisted to a JSONL log exactly once per run.
//!
//! # Architecture
//!
//! - Stages return partial results; the orchestrator merges them
//! - `ERROR` is absorbing and stops the run
//! - Every trace entry becomes exactly one log record, whatever it contains
//!
//! # Modules
//!
//! - `adapters`: Text-generation clients (OpenAI-compatible)
//! - `core`: Orchestration logic (Pipeline, Retry, TraceLog, Orchestrator)
//! - `domain`: Data structures (State, Context, TraceEntry)
//! - `stages`: The requirements-to-code workflow
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the workflow
//! stagewright run "A todo list bot with reminders"
//!
//! # Inspect what each stage did
//! stagewright trace --stage code_critic
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use core::{Gate, Orchestrator, Pipeline, RetryPolicy, Stage, TraceLog};
pub use domain::{Context, StageOutput, State, TraceBuffer, TraceEntry, TraceKind, TraceValue};
