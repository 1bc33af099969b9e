//! Tool catalog and typed dispatch requests.
//!
//! The model addresses tools by name with a JSON argument object. Rather than
//! a string-keyed registry, the catalog is a closed set: [`ToolRequest`] is a
//! tagged enum with one typed argument struct per tool, so every consumer
//! matches exhaustively and unknown names fall through a single explicit arm.

pub mod browser;
pub mod dispatcher;

pub use browser::{BrowserProbe, ConsoleReport, HeadlessChromeProbe};
pub use dispatcher::ToolDispatcher;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core_types::ToolCall;
use crate::llm::ToolMetadata;

/// Marker prefix identifying a tool result as the loop-terminating signal.
/// Only the `task_complete` tool emits it; the loop controller recognizes it
/// nowhere else.
pub const COMPLETION_SENTINEL: &str = "TASK_COMPLETE:";

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandArgs {
    pub command: String,
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileArgs {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileArgs {
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDirectoryArgs {
    pub directory_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDirectoryArgs {
    pub directory_path: String,
}

fn default_wait_time() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckBrowserConsoleArgs {
    pub url: String,
    #[serde(default = "default_wait_time")]
    pub wait_time: u64,
}

/// Payload carried by the completion sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ToolRequest {
    ExecuteCommand(ExecuteCommandArgs),
    CreateFile(CreateFileArgs),
    ReadFile(ReadFileArgs),
    CreateDirectory(CreateDirectoryArgs),
    ListDirectory(ListDirectoryArgs),
    CheckBrowserConsole(CheckBrowserConsoleArgs),
    TaskComplete(CompletionPayload),
}

impl ToolRequest {
    /// Decode a model-issued call into a typed request. Unknown tool names and
    /// malformed argument objects are reported as `Err(description)` so the
    /// dispatcher can feed the text back to the model.
    pub fn parse(call: &ToolCall) -> Result<ToolRequest, String> {
        fn args<T: serde::de::DeserializeOwned>(name: &str, value: &Value) -> Result<T, String> {
            serde_json::from_value(value.clone())
                .map_err(|e| format!("Invalid arguments for tool '{}': {}", name, e))
        }

        match call.name.as_str() {
            "execute_command" => Ok(ToolRequest::ExecuteCommand(args(&call.name, &call.arguments)?)),
            "create_file" => Ok(ToolRequest::CreateFile(args(&call.name, &call.arguments)?)),
            "read_file" => Ok(ToolRequest::ReadFile(args(&call.name, &call.arguments)?)),
            "create_directory" => {
                Ok(ToolRequest::CreateDirectory(args(&call.name, &call.arguments)?))
            }
            "list_directory" => Ok(ToolRequest::ListDirectory(args(&call.name, &call.arguments)?)),
            "check_browser_console" => {
                Ok(ToolRequest::CheckBrowserConsole(args(&call.name, &call.arguments)?))
            }
            "task_complete" => Ok(ToolRequest::TaskComplete(args(&call.name, &call.arguments)?)),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::ExecuteCommand(_) => "execute_command",
            ToolRequest::CreateFile(_) => "create_file",
            ToolRequest::ReadFile(_) => "read_file",
            ToolRequest::CreateDirectory(_) => "create_directory",
            ToolRequest::ListDirectory(_) => "list_directory",
            ToolRequest::CheckBrowserConsole(_) => "check_browser_console",
            ToolRequest::TaskComplete(_) => "task_complete",
        }
    }
}

/// Extract the completion payload from a tool result, if the result carries
/// the sentinel prefix.
pub fn completion_payload(result: &str) -> Option<CompletionPayload> {
    let payload = result.strip_prefix(COMPLETION_SENTINEL)?;
    match serde_json::from_str(payload) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::error!("Completion sentinel carried invalid payload: {}", e);
            None
        }
    }
}

/// The full tool catalog advertised to the model on every request.
pub fn catalog() -> Vec<ToolMetadata> {
    vec![
        ToolMetadata {
            name: "execute_command".to_string(),
            description: "Execute a terminal command. Use this to run shell commands, install packages, run tests, etc. Can use sudo if needed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The command to execute"},
                    "use_sudo": {"type": "boolean", "description": "Whether to use sudo privileges", "default": false},
                    "cwd": {"type": "string", "description": "Working directory for the command"}
                },
                "required": ["command"]
            }),
        },
        ToolMetadata {
            name: "create_file".to_string(),
            description: "Create or overwrite a file with content".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path to the file to create"},
                    "content": {"type": "string", "description": "Content to write to the file"}
                },
                "required": ["file_path", "content"]
            }),
        },
        ToolMetadata {
            name: "read_file".to_string(),
            description: "Read the contents of a file".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path to the file to read"}
                },
                "required": ["file_path"]
            }),
        },
        ToolMetadata {
            name: "create_directory".to_string(),
            description: "Create a directory (including parent directories)".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "directory_path": {"type": "string", "description": "Path to the directory to create"}
                },
                "required": ["directory_path"]
            }),
        },
        ToolMetadata {
            name: "list_directory".to_string(),
            description: "List files and directories in a path".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "directory_path": {"type": "string", "description": "Path to list contents of"}
                },
                "required": ["directory_path"]
            }),
        },
        ToolMetadata {
            name: "check_browser_console".to_string(),
            description: "Test a web application by opening it in a headless browser and checking for console errors. Use this for React, Vue, or any web app to verify it works without errors.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to test (e.g., http://localhost:3000)"},
                    "wait_time": {"type": "integer", "description": "Seconds to wait for the page to load", "default": 5}
                },
                "required": ["url"]
            }),
        },
        ToolMetadata {
            name: "task_complete".to_string(),
            description: "Call this when the task is fully complete and tested".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Summary of what was accomplished"},
                    "project_path": {"type": "string", "description": "Path to the created project (if applicable)"}
                },
                "required": ["summary"]
            }),
        },
    ]
}
