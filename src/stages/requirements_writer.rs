//! Turns the user's request into technical requirements.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapters::LlmClient;
use crate::core::{Stage, StageOutput};
use crate::domain::{Context, State, TraceBuffer};

use super::{generate, REQUIREMENTS};

const ROLE: &str = "You are an expert at writing technical requirements for Telegram web apps.";

pub struct RequirementsWriter {
    llm: Arc<dyn LlmClient>,
}

impl RequirementsWriter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn prompt(user_input: &str) -> String {
        format!(
            "Based on the following user request:\n\
             \"{user_input}\"\n\n\
             Write the technical requirements for a Telegram WebApp.\n\
             The requirements must cover:\n\
             - Core functionality\n\
             - Interface structure\n\
             - Technologies used\n\
             - An example interaction\n\n\
             Return only clear, structured requirements text with no commentary."
        )
    }
}

#[async_trait]
impl Stage for RequirementsWriter {
    async fn process(&self, context: &Context, trace: &mut TraceBuffer) -> Result<StageOutput> {
        let prompt = Self::prompt(context.user_input());
        let reply = generate(self.llm.as_ref(), ROLE, &prompt, trace).await?;

        let requirements = reply.trim();
        if requirements.is_empty() {
            anyhow::bail!("Empty response received");
        }

        Ok(StageOutput::new(State::RequirementsWritten).with(REQUIREMENTS, requirements))
    }
}
