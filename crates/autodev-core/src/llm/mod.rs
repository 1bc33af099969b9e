//! Completion-service abstraction.
//!
//! The loop controller talks to the model through the [`CompletionModel`]
//! trait so tests can substitute scripted fakes. Every request carries the
//! full tool catalog and forces tool selection; the service is expected to
//! answer with tool calls rather than free text after the first turn.

pub mod openai;

pub use openai::OpenAiClient;

pub use crate::core_types::{LLMResponse, Message};
use crate::errors::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name, description, and JSON schema describing one tool to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Request the next assistant turn. Tool selection is forced: the
    /// implementation must ask the service to pick from `tools` rather than
    /// reply with plain text alone.
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: &[ToolMetadata],
    ) -> Result<LLMResponse, AgentError>;
}
