//! The requirements-to-code workflow.
//!
//! Five stages backed by a text-generation client:
//! requirements writer, requirements critic, code writer, code critic and
//! report generator. Each one is gated on the state its predecessor leaves.

pub mod code_critic;
pub mod code_writer;
pub mod reply;
pub mod reporter;
pub mod requirements_critic;
pub mod requirements_writer;
pub mod syntax;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::adapters::LlmClient;
use crate::core::{Gate, Pipeline, PipelineError};
use crate::domain::{State, TraceBuffer, TraceKind};

pub use code_critic::CodeCritic;
pub use code_writer::CodeWriter;
pub use reply::{CodeReview, RequirementsReview};
pub use reporter::Reporter;
pub use requirements_critic::RequirementsCritic;
pub use requirements_writer::RequirementsWriter;
pub use syntax::{DelimiterBalance, SyntaxCheck, SyntaxIssue};

pub const PIPELINE_NAME: &str = "requirements_to_code";

// Stage names
pub const REQUIREMENTS_WRITER: &str = "requirements_writer";
pub const REQUIREMENTS_CRITIC: &str = "requirements_critic";
pub const CODE_WRITER: &str = "code_writer";
pub const CODE_CRITIC: &str = "code_critic";
pub const REPORTER: &str = "reporter";

// Context keys
pub const REQUIREMENTS: &str = "requirements";
pub const REQUIREMENTS_REVIEW: &str = "requirements_review";
pub const GENERATED_CODE: &str = "generated_code";
pub const CODE_REVIEW: &str = "code_review";
pub const FINAL_REPORT: &str = "final_report";

/// Build the five-stage workflow
pub fn default_pipeline(
    llm: Arc<dyn LlmClient>,
    checker: Arc<dyn SyntaxCheck>,
) -> Result<Pipeline, PipelineError> {
    Pipeline::builder(PIPELINE_NAME)
        .stage(
            REQUIREMENTS_WRITER,
            Gate::always(),
            RequirementsWriter::new(llm.clone()),
        )
        .stage(
            REQUIREMENTS_CRITIC,
            Gate::state_is(State::RequirementsWritten),
            RequirementsCritic::new(llm.clone()),
        )
        .stage(
            CODE_WRITER,
            Gate::state_is(State::RequirementsApproved),
            CodeWriter::new(llm.clone()),
        )
        .stage(
            CODE_CRITIC,
            Gate::state_is(State::CodeWritten),
            CodeCritic::new(llm.clone(), checker),
        )
        .stage(REPORTER, Gate::state_is(State::CodeApproved), Reporter::new(llm))
        .build()
}

/// One text-generation call, traced.
///
/// Records the prompt and the raw reply; a failed call is recorded as an
/// `ERROR` entry and handed back to the caller.
pub(crate) async fn generate(
    llm: &dyn LlmClient,
    role: &str,
    prompt: &str,
    trace: &mut TraceBuffer,
) -> Result<String> {
    trace.record(TraceKind::Prompt, prompt);

    match llm.complete(role, prompt).await {
        Ok(completion) => {
            trace.record(
                TraceKind::RawResponse,
                json!({
                    "raw_response": completion.content,
                    "length": completion.content.chars().count(),
                }),
            );
            Ok(completion.content)
        }
        Err(err) => {
            trace.record(
                TraceKind::Error,
                json!({
                    "error": format!("{:#}", err),
                    "client": llm.name(),
                }),
            );
            Err(err)
        }
    }
}
