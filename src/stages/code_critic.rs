//! Validates generated code locally, then asks the model for a review.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::adapters::LlmClient;
use crate::core::{Stage, StageOutput};
use crate::domain::{Context, State, TraceBuffer, TraceKind};

use super::reply::{extract_code, extract_json_object, parse_code_review, CodeReview};
use super::syntax::SyntaxCheck;
use super::{generate, CODE_REVIEW, GENERATED_CODE};

const ROLE: &str = "You are a senior developer. Review Telegram web app code for quality, \
                    find bugs and suggest optimizations.";

pub struct CodeCritic {
    llm: Arc<dyn LlmClient>,
    checker: Arc<dyn SyntaxCheck>,
}

impl CodeCritic {
    pub fn new(llm: Arc<dyn LlmClient>, checker: Arc<dyn SyntaxCheck>) -> Self {
        Self { llm, checker }
    }

    fn prompt(code: &str) -> String {
        format!(
            "Review the following Telegram web app code and return ONLY a JSON answer, \
             with no extra text.\n\n\
             Answer format:\n\
             {{\n  \"approved\": boolean,\n  \"comments\": string,\n  \"issues\": list[string]\n}}\n\n\
             Rules:\n\
             - approved: true only if there are no syntax or logic errors\n\
             - comments: overall remarks on code quality\n\
             - issues: list of concrete problems\n\n\
             Example answer:\n\
             {{\n  \"approved\": false,\n  \"comments\": \"No error handling\",\n  \
             \"issues\": [\"No retry for API requests\", \"No input validation\"]\n}}\n\n\
             Code to review:\n{code}"
        )
    }

    fn verdict(review: CodeReview) -> StageOutput {
        let state = if review.approved {
            State::CodeApproved
        } else {
            State::Error
        };
        StageOutput::new(state).with(CODE_REVIEW, json!(review))
    }
}

#[async_trait]
impl Stage for CodeCritic {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput> {
        let raw = context.get_str(GENERATED_CODE).unwrap_or_default();
        let code = extract_code(raw);

        if code.is_empty() {
            return Ok(Self::verdict(CodeReview::rejected(
                "No code found",
                "Missing code block",
            )));
        }

        if let Err(issue) = self.checker.check(&code) {
            trace.record(
                TraceKind::ValidationError,
                format!("Syntax error: {}", issue),
            );
            return Ok(Self::verdict(CodeReview::rejected(
                "Syntax error in code",
                issue.to_string(),
            )));
        }

        let prompt = Self::prompt(&code);
        let reply = generate(self.llm.as_ref(), ROLE, &prompt, trace).await?;

        let candidate = extract_json_object(&reply);
        let parsed = parse_code_review(candidate).or_else(|first| {
            debug!(error = %first, "Review did not parse, retrying without backslashes");
            parse_code_review(&candidate.replace('\\', ""))
        });

        match parsed {
            Ok(review) => Ok(Self::verdict(review)),
            Err(err) => {
                let reason = format!("{:#}", err);
                trace.record(
                    TraceKind::Error,
                    format!("Review parsing error: {}", reason),
                );
                Ok(Self::verdict(CodeReview::rejected(
                    format!("Invalid review format: {}", reason),
                    "Failed to parse review",
                )))
            }
        }
    }
}
