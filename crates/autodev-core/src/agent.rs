//! Autonomous loop controller.
//!
//! Drives a bounded, resumable tool-calling conversation: call the completion
//! service with the full history and the tool catalog, execute whatever tool
//! calls come back strictly in order, append the results, and repeat until
//! the completion sentinel is observed, the iteration ceiling is hit, or the
//! service fails. Callers always get a [`RunOutcome`]; the only errors that
//! escape before the loop are construction-time misconfiguration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core_types::Message;
use crate::llm::CompletionModel;
use crate::session::{SessionStatus, SessionStore, SessionUpdate};
use crate::tools::{catalog, completion_payload, CompletionPayload, ToolDispatcher};

/// Injected when the model stops calling tools after the first iteration.
const TOOL_USE_REMINDER: &str = "STOP. You must call the actual tools now. Do not write markdown \
     code blocks or explanations. Use create_directory, create_file, and execute_command to do \
     the work, then call task_complete when finished.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Ceiling on loop turns; reaching it without the sentinel is Exhausted.
    pub max_iterations: usize,
    /// Deadline for each completion-service call.
    pub llm_timeout: Duration,
    /// Replaces the built-in system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            llm_timeout: Duration::from_secs(120),
            system_prompt: None,
        }
    }
}

/// Final structured result of one execution of the loop.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub summary: String,
    pub project_path: Option<String>,
    pub iterations: usize,
    pub max_iterations_reached: bool,
    pub session_id: Option<String>,
    pub files_created: usize,
    pub commands_executed: usize,
    pub error: Option<String>,
}

pub struct AutonomousAgent {
    llm: Arc<dyn CompletionModel>,
    dispatcher: ToolDispatcher,
    sessions: Arc<SessionStore>,
    config: AgentConfig,
    session_id: Option<String>,
}

impl AutonomousAgent {
    pub fn new(
        llm: Arc<dyn CompletionModel>,
        dispatcher: ToolDispatcher,
        sessions: Arc<SessionStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            sessions,
            config,
            session_id: None,
        }
    }

    /// Resume an existing session: its rendered context is appended to the
    /// system prompt and completion bookkeeping targets it.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Run one task to completion, exhaustion, or abort.
    pub async fn run(&mut self, task: &str) -> RunOutcome {
        log::info!("Agent run started with task: {}", task);
        self.dispatcher.begin_run();

        let mut system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(default_system_prompt);

        if let Some(id) = &self.session_id {
            let context = self.sessions.render_context(id).await;
            if context.is_empty() {
                log::warn!("Resume requested but session {} has no context", id);
            } else {
                log::info!("Continuing session: {}", id);
                system.push_str("\n\n");
                system.push_str(&context);
            }
        }

        let mut history = vec![Message::system(system), Message::user(task)];
        let tools = catalog();

        let mut iterations = 0usize;
        let mut completion: Option<CompletionPayload> = None;
        let mut clarifying: Option<String> = None;
        let mut fatal: Option<String> = None;

        while iterations < self.config.max_iterations && completion.is_none() {
            iterations += 1;
            log::info!("Iteration {}/{}", iterations, self.config.max_iterations);

            let response = match tokio::time::timeout(
                self.config.llm_timeout,
                self.llm.complete(history.clone(), &tools),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    log::error!("Completion service failed: {}", e);
                    fatal = Some(e.to_string());
                    break;
                }
                Err(_) => {
                    let msg = format!(
                        "Completion service call timed out after {}s",
                        self.config.llm_timeout.as_secs()
                    );
                    log::error!("{}", msg);
                    fatal = Some(msg);
                    break;
                }
            };

            let content = response.content.clone().unwrap_or_default();
            if !content.is_empty() {
                log::info!("Assistant: {}", content);
            }
            history.push(Message::assistant(content.clone(), response.tool_calls.clone()));

            if response.has_tool_calls() {
                let calls = response.tool_calls.as_deref().unwrap_or_default();
                log::info!("Executing {} tool call(s)", calls.len());
                // Strictly in the order returned: a later call may depend
                // on an earlier one's side effects.
                for call in calls {
                    let result = self.dispatcher.dispatch(call).await;
                    if let Some(payload) = completion_payload(&result) {
                        log::info!("Task marked as complete");
                        completion = Some(payload);
                        // Remaining calls in this batch still execute and
                        // land in history for record completeness.
                    }
                    history.push(Message::tool_result(call.id.clone(), result));
                }
            } else {
                if iterations == 1 && !content.is_empty() {
                    // Clarifying question: hand control back to the
                    // caller without error.
                    log::info!("Agent asked a clarifying question, exiting early");
                    clarifying = Some(content);
                    break;
                }
                log::warn!("No tool calls made, redirecting agent to use tools");
                history.push(Message::user(TOOL_USE_REMINDER));
            }
        }

        self.record_session(task, &completion, iterations).await;

        let success = completion.is_some();
        let max_iterations_reached = !success
            && clarifying.is_none()
            && fatal.is_none()
            && iterations >= self.config.max_iterations;

        let summary = if let Some(payload) = &completion {
            payload.summary.clone()
        } else if let Some(question) = &clarifying {
            question.clone()
        } else if fatal.is_some() {
            "Task aborted before completion".to_string()
        } else {
            "Maximum iterations reached without completion".to_string()
        };

        let outcome = RunOutcome {
            success,
            summary,
            project_path: completion.as_ref().and_then(|p| p.project_path.clone()),
            iterations,
            max_iterations_reached,
            session_id: self.session_id.clone(),
            files_created: self.dispatcher.files_created().len(),
            commands_executed: self.dispatcher.commands_executed().len(),
            error: fatal,
        };

        if outcome.success {
            log::info!(
                "Task completed: {} ({} files, {} commands, {} iterations)",
                outcome.summary,
                outcome.files_created,
                outcome.commands_executed,
                outcome.iterations
            );
        } else {
            log::warn!(
                "Task incomplete after {} iterations (max reached: {})",
                outcome.iterations,
                outcome.max_iterations_reached
            );
        }

        outcome
    }

    /// Session bookkeeping runs exactly once, after the loop terminates, so a
    /// crash mid-loop never leaves a partial snapshot behind.
    async fn record_session(
        &mut self,
        task: &str,
        completion: &Option<CompletionPayload>,
        iterations: usize,
    ) {
        let Some(payload) = completion else { return };
        let Some(project_path) = &payload.project_path else {
            return;
        };

        let resuming = self.session_id.is_some();
        if !resuming {
            let project_name = Path::new(project_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| project_path.clone());
            match self
                .sessions
                .create_session(&project_name, project_path, task)
                .await
            {
                Ok(id) => self.session_id = Some(id),
                Err(e) => {
                    log::error!("Failed to create session: {}", e);
                    return;
                }
            }
        }

        if let Some(id) = &self.session_id {
            let update = SessionUpdate {
                // create_session already recorded the initial prompt.
                new_prompt: resuming.then(|| task.to_string()),
                files_created: self.dispatcher.files_created().to_vec(),
                commands_executed: self.dispatcher.commands_executed().to_vec(),
                status: Some(SessionStatus::Complete),
                iterations: Some(iterations as u32),
            };
            if let Err(e) = self.sessions.update(id, update).await {
                log::error!("Failed to update session {}: {}", id, e);
            }
        }
    }
}

fn default_system_prompt() -> String {
    "You are an autonomous build agent. You MUST use tool calls to perform ALL actions.\n\
     \n\
     You cannot communicate through prose or markdown; every turn must invoke one of the \
     available tools:\n\
     - create_directory(directory_path)\n\
     - create_file(file_path, content)\n\
     - read_file(file_path)\n\
     - list_directory(directory_path)\n\
     - execute_command(command, cwd)\n\
     - check_browser_console(url)\n\
     - task_complete(summary, project_path)\n\
     \n\
     Workflow example for a small script task:\n\
     1. create_directory(\"generated_projects/ssh-script\")\n\
     2. create_file(\"generated_projects/ssh-script/ssh_connect.py\", \"import paramiko...\")\n\
     3. create_file(\"generated_projects/ssh-script/requirements.txt\", \"paramiko\")\n\
     4. execute_command(\"pip install -r requirements.txt\", cwd=\"generated_projects/ssh-script\")\n\
     5. task_complete(\"SSH script created\", \"generated_projects/ssh-script\")\n\
     \n\
     Create complete, professional implementations. Test what you build, fix what fails, and \
     call task_complete only when the task is done and verified."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{LLMResponse, Role, ToolCall};
    use crate::errors::AgentError;
    use crate::exec::CommandRunner;
    use crate::llm::ToolMetadata;
    use crate::policy::AllowAll;
    use crate::tools::{BrowserProbe, ConsoleReport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FailingProbe;

    #[async_trait]
    impl BrowserProbe for FailingProbe {
        async fn check(&self, _url: &str, _wait_time: u64) -> Result<ConsoleReport, AgentError> {
            Err(AgentError::BrowserError("no browser in tests".to_string()))
        }
    }

    /// Plays back a fixed script of responses and records every request.
    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<LLMResponse, AgentError>>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<LLMResponse, AgentError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(
            &self,
            messages: Vec<Message>,
            _tools: &[ToolMetadata],
        ) -> Result<LLMResponse, AgentError> {
            self.requests.lock().unwrap().push(messages);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::LLMError("script exhausted".to_string())))
        }
    }

    fn tool_turn(calls: Vec<(&str, &str, serde_json::Value)>) -> Result<LLMResponse, AgentError> {
        Ok(LLMResponse {
            content: None,
            tool_calls: Some(
                calls
                    .into_iter()
                    .map(|(id, name, arguments)| ToolCall {
                        id: Some(id.to_string()),
                        name: name.to_string(),
                        arguments,
                    })
                    .collect(),
            ),
            finish_reason: None,
            usage: None,
        })
    }

    fn text_turn(content: &str) -> Result<LLMResponse, AgentError> {
        Ok(LLMResponse {
            content: Some(content.to_string()),
            tool_calls: None,
            finish_reason: None,
            usage: None,
        })
    }

    struct Harness {
        _workdir: tempfile::TempDir,
        _session_dir: tempfile::TempDir,
        workdir: std::path::PathBuf,
        sessions: Arc<SessionStore>,
    }

    impl Harness {
        fn new() -> Self {
            let workdir = tempfile::tempdir().unwrap();
            let session_dir = tempfile::tempdir().unwrap();
            let sessions = Arc::new(SessionStore::new(session_dir.path()).unwrap());
            let path = workdir.path().to_path_buf();
            Self {
                _workdir: workdir,
                _session_dir: session_dir,
                workdir: path,
                sessions,
            }
        }

        fn agent(&self, model: Arc<ScriptedModel>, config: AgentConfig) -> AutonomousAgent {
            let dispatcher = ToolDispatcher::new(
                CommandRunner::new(),
                Arc::new(FailingProbe),
                Arc::new(AllowAll),
            );
            AutonomousAgent::new(model, dispatcher, self.sessions.clone(), config)
        }
    }

    #[tokio::test]
    async fn test_end_to_end_create_and_run_script() {
        let harness = Harness::new();
        let project = harness.workdir.join("hello-app");
        let script = project.join("hello.py");

        let model = ScriptedModel::new(vec![
            tool_turn(vec![(
                "call_1",
                "create_file",
                json!({"file_path": script.to_str().unwrap(), "content": "print('hi')"}),
            )]),
            tool_turn(vec![(
                "call_2",
                "execute_command",
                json!({"command": format!("cat {}", script.display())}),
            )]),
            tool_turn(vec![(
                "call_3",
                "task_complete",
                json!({"summary": "Created and ran hello.py", "project_path": project.to_str().unwrap()}),
            )]),
        ]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("create hello.py printing a greeting and run it").await;

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 3);
        assert!(!outcome.max_iterations_reached);
        assert!(outcome.files_created >= 1);
        assert!(outcome.commands_executed >= 1);
        assert_eq!(outcome.summary, "Created and ran hello.py");
        assert!(outcome.error.is_none());

        // Session was created and carries the accumulated progress.
        let session_id = outcome.session_id.unwrap();
        let session = harness.sessions.load(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
        assert_eq!(session.iterations, 3);
        assert_eq!(session.files_created.len(), 1);
        assert_eq!(session.commands_executed.len(), 1);
        assert_eq!(session.project_name, "hello-app");
    }

    #[tokio::test]
    async fn test_tool_calls_execute_in_listed_order() {
        let harness = Harness::new();
        let dir = harness.workdir.join("x");
        let file = dir.join("y.txt");

        let model = ScriptedModel::new(vec![
            tool_turn(vec![
                (
                    "call_1",
                    "create_directory",
                    json!({"directory_path": dir.to_str().unwrap()}),
                ),
                (
                    "call_2",
                    "create_file",
                    json!({"file_path": file.to_str().unwrap(), "content": "ordered"}),
                ),
            ]),
            tool_turn(vec![(
                "call_3",
                "task_complete",
                json!({"summary": "Wrote into the new directory"}),
            )]),
        ]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("make x/y.txt").await;

        assert!(outcome.success);
        // The directory existed by the time the write ran.
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "ordered");

        // The second request's history holds the directory result strictly
        // before the file result.
        let requests = model.requests();
        let tool_results: Vec<&Message> = requests[1]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_results.len(), 2);
        assert_eq!(tool_results[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(tool_results[0].content.contains("created directory"));
        assert_eq!(tool_results[1].tool_call_id.as_deref(), Some("call_2"));
        assert!(tool_results[1].content.contains("created file"));
    }

    #[tokio::test]
    async fn test_clarifying_question_exits_early_without_error() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![text_turn("Which framework should the app use?")]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("build an app").await;

        assert!(!outcome.success);
        assert!(outcome.error.is_none());
        assert!(!outcome.max_iterations_reached);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.summary, "Which framework should the app use?");
        // Exactly one completion call went out.
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_tool_calls_after_first_iteration_injects_reminder() {
        let harness = Harness::new();
        let dir = harness.workdir.join("proj");

        let model = ScriptedModel::new(vec![
            tool_turn(vec![(
                "call_1",
                "create_directory",
                json!({"directory_path": dir.to_str().unwrap()}),
            )]),
            text_turn("Now I will explain my plan in detail..."),
            tool_turn(vec![(
                "call_2",
                "task_complete",
                json!({"summary": "Done after redirection"}),
            )]),
        ]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("make proj").await;

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 3);

        // The third request carries the corrective user message.
        let requests = model.requests();
        let last = requests[2].last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("call the actual tools"));
    }

    #[tokio::test]
    async fn test_iteration_cap_reported_as_exhaustion() {
        let harness = Harness::new();
        let dir = harness.workdir.join("spin");
        let call = (
            "call_1",
            "create_directory",
            json!({"directory_path": dir.to_str().unwrap()}),
        );

        let model = ScriptedModel::new(vec![
            tool_turn(vec![call.clone()]),
            tool_turn(vec![call.clone()]),
            tool_turn(vec![call]),
        ]);

        let config = AgentConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let mut agent = harness.agent(model, config);
        let outcome = agent.run("never finishes").await;

        assert!(!outcome.success);
        assert!(outcome.max_iterations_reached);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_completion_service_failure_aborts_run() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![Err(AgentError::LLMError(
            "401 Unauthorized".to_string(),
        ))]);

        let mut agent = harness.agent(model, AgentConfig::default());
        let outcome = agent.run("anything").await;

        assert!(!outcome.success);
        assert!(!outcome.max_iterations_reached);
        assert!(outcome.error.unwrap().contains("401 Unauthorized"));
    }

    #[tokio::test]
    async fn test_sentinel_mid_batch_still_runs_remaining_calls() {
        let harness = Harness::new();
        let after = harness.workdir.join("after.txt");

        let model = ScriptedModel::new(vec![tool_turn(vec![
            ("call_1", "task_complete", json!({"summary": "Finished early"})),
            (
                "call_2",
                "create_file",
                json!({"file_path": after.to_str().unwrap(), "content": "still ran"}),
            ),
        ])]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("finish fast").await;

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 1);
        // The trailing call in the batch executed and was logged.
        assert_eq!(std::fs::read_to_string(&after).unwrap(), "still ran");
        // But no further completion-service calls happened.
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_stop_the_loop() {
        let harness = Harness::new();
        let model = ScriptedModel::new(vec![
            tool_turn(vec![("call_1", "deploy_to_mars", json!({}))]),
            tool_turn(vec![(
                "call_2",
                "task_complete",
                json!({"summary": "Recovered from bad tool name"}),
            )]),
        ]);

        let mut agent = harness.agent(model.clone(), AgentConfig::default());
        let outcome = agent.run("try something odd").await;

        assert!(outcome.success);
        let requests = model.requests();
        let error_result = requests[1]
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(error_result.content.contains("Unknown tool: deploy_to_mars"));
    }

    #[tokio::test]
    async fn test_resume_injects_context_and_appends_prompt() {
        let harness = Harness::new();
        let session_id = harness
            .sessions
            .create_session("shop", "generated/shop", "build a shop")
            .await
            .unwrap();

        let model = ScriptedModel::new(vec![tool_turn(vec![(
            "call_1",
            "task_complete",
            json!({"summary": "Added checkout", "project_path": "generated/shop"}),
        )])]);

        let mut agent = harness
            .agent(model.clone(), AgentConfig::default())
            .with_session(session_id.clone());
        let outcome = agent.run("add a checkout page").await;

        assert!(outcome.success);
        assert_eq!(outcome.session_id.as_deref(), Some(session_id.as_str()));

        // The system prompt carried the rendered session context.
        let requests = model.requests();
        let system = &requests[0][0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("CONTINUING PROJECT SESSION: shop"));

        // The resumed session gained the new prompt.
        let session = harness.sessions.load(&session_id).await.unwrap().unwrap();
        assert_eq!(session.prompts, vec!["build a shop", "add a checkout page"]);
        assert_eq!(session.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn test_second_run_counts_start_from_zero() {
        let harness = Harness::new();
        let project = harness.workdir.join("counted");
        let file = project.join("a.txt");

        let model = ScriptedModel::new(vec![
            tool_turn(vec![
                (
                    "call_1",
                    "create_file",
                    json!({"file_path": file.to_str().unwrap(), "content": "x"}),
                ),
                (
                    "call_2",
                    "task_complete",
                    json!({"summary": "Wrote a.txt", "project_path": project.to_str().unwrap()}),
                ),
            ]),
            tool_turn(vec![(
                "call_3",
                "task_complete",
                json!({"summary": "Nothing left to do", "project_path": project.to_str().unwrap()}),
            )]),
        ]);

        let mut agent = harness.agent(model, AgentConfig::default());

        let first = agent.run("write a.txt").await;
        assert!(first.success);
        assert_eq!(first.files_created, 1);

        // Same agent, second run touches nothing; counts must not carry over.
        let second = agent.run("confirm the project is done").await;
        assert!(second.success);
        assert_eq!(second.files_created, 0);
        assert_eq!(second.commands_executed, 0);

        // The session log gained no duplicate entries from the second run.
        let session_id = first.session_id.unwrap();
        let session = harness.sessions.load(&session_id).await.unwrap().unwrap();
        assert_eq!(session.files_created.len(), 1);
        assert!(session.commands_executed.is_empty());
    }

    struct SlowModel;

    #[async_trait]
    impl CompletionModel for SlowModel {
        async fn complete(
            &self,
            _messages: Vec<Message>,
            _tools: &[ToolMetadata],
        ) -> Result<LLMResponse, AgentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(LLMResponse {
                content: Some("too late".to_string()),
                tool_calls: None,
                finish_reason: None,
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn test_llm_call_deadline_aborts_run() {
        let harness = Harness::new();
        let dispatcher = ToolDispatcher::new(
            CommandRunner::new(),
            Arc::new(FailingProbe),
            Arc::new(AllowAll),
        );
        let config = AgentConfig {
            llm_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut agent =
            AutonomousAgent::new(Arc::new(SlowModel), dispatcher, harness.sessions.clone(), config);

        let outcome = agent.run("anything").await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
    }
}
