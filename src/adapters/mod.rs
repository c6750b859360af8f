//! Adapter interfaces for external systems.
//!
//! Stages talk to text-generation services only through [`LlmClient`], so
//! any OpenAI-compatible endpoint (or a scripted stand-in) can back them.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

pub use openai::OpenAiClient;

/// Output from a text-generation call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Tokens used (if reported)
    pub tokens_used: Option<u64>,
}

impl Completion {
    /// Create a completion with just content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tokens_used: None,
        }
    }
}

/// Trait for text-generation services
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Human-readable client name
    fn name(&self) -> &str;

    /// Generate a reply to `prompt`, with `system_role` describing the persona
    async fn complete(&self, system_role: &str, prompt: &str) -> Result<Completion>;
}
