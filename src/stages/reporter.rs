//! Summarizes the whole run into a final report.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::adapters::LlmClient;
use crate::core::{Stage, StageOutput};
use crate::domain::{Context, State, TraceBuffer};

use super::{generate, FINAL_REPORT};

const ROLE: &str = "You are an analyst. Produce final reports covering every stage of the work.";

pub struct Reporter {
    llm: Arc<dyn LlmClient>,
}

impl Reporter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(context: &Context) -> Result<String> {
        let data = serde_json::to_string_pretty(context).context("Failed to render context")?;

        Ok(format!(
            "Produce a final report with the following sections:\n\
             1. Original requirements\n\
             2. Requirements review\n\
             3. Generated code\n\
             4. Code review results\n\
             5. Final recommendations\n\n\
             Data:\n{data}"
        ))
    }
}

#[async_trait]
impl Stage for Reporter {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput> {
        let prompt = Self::prompt(context)?;
        let report = generate(self.llm.as_ref(), ROLE, &prompt, trace).await?;

        if report.trim().is_empty() {
            anyhow::bail!("Empty report received");
        }

        Ok(StageOutput::new(State::Finished).with(FINAL_REPORT, report))
    }
}
