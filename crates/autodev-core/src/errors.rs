//! Error types for failure handling across the agent.
//!
//! Failures are categorized by subsystem so the loop controller can decide
//! which ones are fatal (completion-service failures) and which ones are fed
//! back to the model as plain text (tool and dispatch failures).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("LLM interaction failed: {0}")]
    LLMError(String),
    #[error("Tool execution failed for '{tool_name}': {message}")]
    ToolError { tool_name: String, message: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Session error: {0}")]
    SessionError(String),
    #[error("Browser check failed: {0}")]
    BrowserError(String),
    #[error("Command timed out after {0} seconds")]
    CommandTimeout(u64),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::LLMError(err.to_string())
    }
}
