//! Shell command execution with a hard wall-clock timeout.
//!
//! Exactly one command line per call, run through the user's shell. A timeout
//! kills the process and surfaces as [`AgentError::CommandTimeout`], which is
//! distinct from a non-zero exit code so callers can tell "hung" apart from
//! "failed".

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::errors::AgentError;

#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: String,
}

impl CommandRunner {
    pub fn new() -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Self { shell }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Run one command line, optionally elevated with a `sudo` prefix and in
    /// a given working directory. Waits at most `timeout`; on expiry the
    /// process is killed and a timeout-kind error is returned.
    pub async fn execute(
        &self,
        command: &str,
        use_sudo: bool,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecResult, AgentError> {
        let command_line = if use_sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        };

        log::info!("Executing command: {}", command_line);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // The shell leads its own process group, so a timeout can take
            // down everything the command forked, not just the shell.
            .process_group(0);

        if let Some(dir) = cwd {
            cmd.current_dir(PathBuf::from(dir));
        }

        let child = cmd
            .spawn()
            .map_err(|e| AgentError::IoError(format!("Command execution error: {}", e)))?;
        let pgid = child.id();

        // wait_with_output() drains stdout and stderr concurrently, so a
        // chatty process cannot deadlock on a full pipe.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = ExecResult {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                log::debug!("Command exit code: {:?}", result.exit_code);
                Ok(result)
            }
            Ok(Err(e)) => Err(AgentError::IoError(format!(
                "Command execution error: {}",
                e
            ))),
            Err(_) => {
                log::warn!(
                    "Command timed out after {}s, killing: {}",
                    timeout.as_secs(),
                    command_line
                );
                // Kill the whole group; compound commands leave children
                // behind if only the shell dies.
                if let Some(pid) = pgid {
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
                Err(AgentError::CommandTimeout(timeout.as_secs()))
            }
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}
