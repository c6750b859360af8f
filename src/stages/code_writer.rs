//! Writes code from approved requirements, folding in earlier review feedback.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::adapters::LlmClient;
use crate::core::{Stage, StageOutput};
use crate::domain::{Context, State, TraceBuffer};

use super::reply::CodeReview;
use super::{generate, CODE_REVIEW, GENERATED_CODE, REQUIREMENTS, REQUIREMENTS_REVIEW};

const ROLE: &str = "You are a senior Python developer experienced with Telegram web apps. \
                    Write clean, efficient code.";

pub struct CodeWriter {
    llm: Arc<dyn LlmClient>,
}

impl CodeWriter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(context: &Context, requirements: &str) -> String {
        let mut prompt = format!(
            "Write the code for a Telegram web app strictly following these requirements:\n{}\n",
            requirements
        );

        let review_comments = context
            .get(REQUIREMENTS_REVIEW)
            .and_then(|review| review.get("comments"))
            .and_then(|comments| comments.as_str())
            .filter(|comments| !comments.trim().is_empty());
        if let Some(comments) = review_comments {
            prompt.push_str(&format!("\nRequirements review notes: {}\n", comments));
        }

        let previous = context
            .get(CODE_REVIEW)
            .and_then(|review| serde_json::from_value::<CodeReview>(review.clone()).ok());
        if let Some(review) = previous {
            prompt.push_str(&format!(
                "\nCritique of the previous code: {}\nFix the following issues: {}\n",
                review.comments,
                review.issues.join(", ")
            ));
        }

        prompt.push_str("\nReturn ONLY Python code with no explanations, wrapped in ```python ... ```");
        prompt
    }
}

#[async_trait]
impl Stage for CodeWriter {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput> {
        let requirements = context
            .get_str(REQUIREMENTS)
            .context("No requirements in context")?;

        let prompt = Self::prompt(context, requirements);
        let code = generate(self.llm.as_ref(), ROLE, &prompt, trace).await?;

        Ok(StageOutput::new(State::CodeWritten).with(GENERATED_CODE, code))
    }
}
