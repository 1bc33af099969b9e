//! Translation of model-issued tool calls into side effects.
//!
//! The dispatcher never raises: every failure path, from an unknown tool name
//! to a filesystem error, is rendered as an error-describing string so the
//! loop can append it to the conversation and let the model self-correct.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;

use crate::core_types::ToolCall;
use crate::exec::CommandRunner;
use crate::policy::ApprovalPolicy;
use crate::tools::{
    BrowserProbe, CheckBrowserConsoleArgs, CompletionPayload, CreateDirectoryArgs, CreateFileArgs,
    ExecuteCommandArgs, ListDirectoryArgs, ReadFileArgs, ToolRequest, COMPLETION_SENTINEL,
};

/// Default per-command timeout.
const COMMAND_TIMEOUT_SECS: u64 = 60;
/// Timeout for package-manager style commands, which routinely run long.
const INSTALL_TIMEOUT_SECS: u64 = 600;

pub struct ToolDispatcher {
    runner: CommandRunner,
    probe: Arc<dyn BrowserProbe>,
    policy: Arc<dyn ApprovalPolicy>,
    files_created: Vec<String>,
    commands_executed: Vec<String>,
}

impl ToolDispatcher {
    pub fn new(
        runner: CommandRunner,
        probe: Arc<dyn BrowserProbe>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        Self {
            runner,
            probe,
            policy,
            files_created: Vec::new(),
            commands_executed: Vec::new(),
        }
    }

    /// File paths touched by `create_file` this run, in call order.
    pub fn files_created(&self) -> &[String] {
        &self.files_created
    }

    /// Shell commands run this run, in call order. A log, not a set.
    pub fn commands_executed(&self) -> &[String] {
        &self.commands_executed
    }

    /// Clear both per-run accumulators. The loop calls this when a run
    /// starts so a reused dispatcher never carries counts across runs.
    pub fn begin_run(&mut self) {
        self.files_created.clear();
        self.commands_executed.clear();
    }

    /// Execute one tool call and return its textual result.
    pub async fn dispatch(&mut self, call: &ToolCall) -> String {
        log::info!("Dispatching tool: {} with args: {}", call.name, call.arguments);

        let request = match ToolRequest::parse(call) {
            Ok(request) => request,
            Err(description) => {
                log::warn!("Tool dispatch rejected: {}", description);
                return description;
            }
        };

        if !self.policy.allows(&request) {
            let denied = format!("Tool execution denied by policy: {}", request.name());
            log::info!("{}", denied);
            return denied;
        }

        match request {
            ToolRequest::ExecuteCommand(args) => self.execute_command(args).await,
            ToolRequest::CreateFile(args) => self.create_file(args).await,
            ToolRequest::ReadFile(args) => self.read_file(args).await,
            ToolRequest::CreateDirectory(args) => self.create_directory(args).await,
            ToolRequest::ListDirectory(args) => self.list_directory(args).await,
            ToolRequest::CheckBrowserConsole(args) => self.check_browser_console(args).await,
            ToolRequest::TaskComplete(payload) => Self::task_complete(payload),
        }
    }

    fn command_timeout(command: &str) -> Duration {
        let long_running = ["npm", "npx", "install"]
            .iter()
            .any(|keyword| command.contains(keyword));
        if long_running {
            Duration::from_secs(INSTALL_TIMEOUT_SECS)
        } else {
            Duration::from_secs(COMMAND_TIMEOUT_SECS)
        }
    }

    async fn execute_command(&mut self, args: ExecuteCommandArgs) -> String {
        self.commands_executed.push(args.command.clone());

        let timeout = Self::command_timeout(&args.command);
        match self
            .runner
            .execute(&args.command, args.use_sudo, args.cwd.as_deref(), timeout)
            .await
        {
            Ok(result) => {
                let mut out = format!("Exit code: {}\n", result.exit_code.unwrap_or(-1));
                if !result.stdout.is_empty() {
                    out.push_str(&format!("STDOUT:\n{}\n", result.stdout));
                }
                if !result.stderr.is_empty() {
                    out.push_str(&format!("STDERR:\n{}\n", result.stderr));
                }
                out
            }
            Err(e) => format!("Error executing command: {}", e),
        }
    }

    async fn create_file(&mut self, args: CreateFileArgs) -> String {
        let path = Path::new(&args.file_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return format!("Error creating file: {}", e);
                }
            }
        }

        match fs::write(path, &args.content).await {
            Ok(()) => {
                log::info!("Created file: {}", args.file_path);
                self.files_created.push(args.file_path.clone());
                format!("Successfully created file: {}", args.file_path)
            }
            Err(e) => format!("Error creating file: {}", e),
        }
    }

    async fn read_file(&self, args: ReadFileArgs) -> String {
        match fs::read_to_string(&args.file_path).await {
            Ok(content) => content,
            Err(e) => format!("Error reading file: {}", e),
        }
    }

    async fn create_directory(&self, args: CreateDirectoryArgs) -> String {
        match fs::create_dir_all(&args.directory_path).await {
            Ok(()) => {
                log::info!("Created directory: {}", args.directory_path);
                format!("Successfully created directory: {}", args.directory_path)
            }
            Err(e) => format!("Error creating directory: {}", e),
        }
    }

    async fn list_directory(&self, args: ListDirectoryArgs) -> String {
        let mut entries = match fs::read_dir(&args.directory_path).await {
            Ok(entries) => entries,
            Err(e) => return format!("Error listing directory: {}", e),
        };

        let mut listing = format!("Contents of {}:\n", args.directory_path);
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let tag = match entry.file_type().await {
                        Ok(kind) if kind.is_dir() => "DIR",
                        Ok(_) => "FILE",
                        Err(_) => "FILE",
                    };
                    listing.push_str(&format!(
                        "  [{}] {}\n",
                        tag,
                        entry.file_name().to_string_lossy()
                    ));
                }
                Ok(None) => break,
                Err(e) => return format!("Error listing directory: {}", e),
            }
        }
        listing
    }

    async fn check_browser_console(&self, args: CheckBrowserConsoleArgs) -> String {
        match self.probe.check(&args.url, args.wait_time).await {
            Ok(report) => report.format(),
            Err(e) => format!("Error checking browser: {}", e),
        }
    }

    fn task_complete(payload: CompletionPayload) -> String {
        // Serialization of a two-field struct of strings cannot fail.
        match serde_json::to_string(&payload) {
            Ok(encoded) => format!("{}{}", COMPLETION_SENTINEL, encoded),
            Err(e) => format!("Error recording completion: {}", e),
        }
    }
}
