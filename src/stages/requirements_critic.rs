//! Reviews requirements for completeness and feasibility.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::adapters::LlmClient;
use crate::core::{Stage, StageOutput};
use crate::domain::{Context, State, TraceBuffer, TraceKind};

use super::reply::{extract_json_object, RequirementsReview};
use super::{generate, REQUIREMENTS, REQUIREMENTS_REVIEW};

const ROLE: &str = "You are an expert requirements analyst. Check Telegram web app \
                    requirements for completeness and feasibility.";

pub struct RequirementsCritic {
    llm: Arc<dyn LlmClient>,
}

impl RequirementsCritic {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(requirements: &str) -> String {
        format!(
            "Analyze the following requirements:\n\
             {requirements}\n\n\
             IMPORTANT: the answer must be strictly JSON:\n\
             {{\n  \"approved\": boolean,\n  \"comments\": string,\n  \"score\": integer 1-10\n}}\n\
             JSON only, no other text!"
        )
    }

    fn verdict(review: RequirementsReview) -> StageOutput {
        let state = if review.approved {
            State::RequirementsApproved
        } else {
            State::Error
        };
        StageOutput::new(state).with(REQUIREMENTS_REVIEW, json!(review))
    }
}

#[async_trait]
impl Stage for RequirementsCritic {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput> {
        let requirements = context.get_str(REQUIREMENTS).unwrap_or_default();
        if requirements.trim().is_empty() {
            return Ok(Self::verdict(RequirementsReview::rejected(
                "Empty or invalid requirements",
            )));
        }

        let prompt = Self::prompt(requirements);
        let reply = generate(self.llm.as_ref(), ROLE, &prompt, trace).await?;
        if reply.trim().is_empty() {
            anyhow::bail!("Empty response received");
        }

        let candidate = extract_json_object(&reply);
        match serde_json::from_str::<RequirementsReview>(candidate) {
            Ok(review) => Ok(Self::verdict(review)),
            Err(err) => {
                trace.record(
                    TraceKind::DecodingError,
                    json!({ "error": err.to_string(), "candidate": candidate }),
                );
                Ok(Self::verdict(RequirementsReview::rejected(format!(
                    "Invalid response format: {}",
                    err
                ))))
            }
        }
    }
}
