//! Core library for the autodev autonomous build agent.
//!
//! Given a natural-language task, the agent repeatedly calls a chat-completion
//! endpoint with a fixed toolset, executes whatever tool calls the model
//! returns, feeds the results back, and stops on an explicit completion
//! signal or an iteration ceiling. Progress on a project is tracked in a
//! durable session record so work can resume across invocations.
//!
//! The main pieces:
//!
//! - [`agent::AutonomousAgent`]: the bounded, resumable tool-calling loop
//! - [`tools::ToolDispatcher`]: maps model-issued tool calls to side effects
//! - [`exec::CommandRunner`]: one shell command under a hard timeout
//! - [`session::SessionStore`]: durable per-project progress records
//! - [`llm::CompletionModel`]: the completion-service seam

pub mod agent;
pub mod config;
pub mod core_types;
pub mod errors;
pub mod exec;
pub mod llm;
pub mod policy;
pub mod session;
pub mod tools;

pub use agent::{AgentConfig, AutonomousAgent, RunOutcome};
pub use config::Settings;
pub use errors::AgentError;
pub use exec::CommandRunner;
pub use llm::{CompletionModel, OpenAiClient};
pub use policy::{AllowAll, ApprovalPolicy, DenyAll};
pub use session::{Session, SessionStatus, SessionStore, SessionUpdate};
pub use tools::{BrowserProbe, HeadlessChromeProbe, ToolDispatcher};
