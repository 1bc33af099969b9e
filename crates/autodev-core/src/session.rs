//! Durable session records tracking cumulative progress on a project.
//!
//! One JSON file per session id under the session directory. Updates merge:
//! file paths are a set union, prompts and commands append, status and
//! iteration count replace. Concurrent updates to the same id are serialized
//! by a per-id lock; distinct ids never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_name: String,
    pub project_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Every task description given to the agent in this session, in order.
    pub prompts: Vec<String>,
    /// Deduplicated set of file paths touched, insertion order preserved.
    pub files_created: Vec<String>,
    /// Log of shell commands run. Not deduplicated.
    pub commands_executed: Vec<String>,
    pub status: SessionStatus,
    pub iterations: u32,
}

/// Lightweight listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub project_name: String,
    pub project_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub prompts_count: usize,
    pub files_count: usize,
}

/// Partial update; unset fields leave the stored record untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub new_prompt: Option<String>,
    pub files_created: Vec<String>,
    pub commands_executed: Vec<String>,
    pub status: Option<SessionStatus>,
    pub iterations: Option<u32>,
}

pub struct SessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| AgentError::SessionError(format!("Cannot create session dir: {}", e)))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Create a new session and return its id, derived from the project name
    /// and creation timestamp.
    pub async fn create_session(
        &self,
        project_name: &str,
        project_path: &str,
        initial_prompt: &str,
    ) -> Result<String, AgentError> {
        let now = Utc::now();
        let session_id = format!("{}_{}", project_name, now.format("%Y%m%d_%H%M%S"));

        let session = Session {
            session_id: session_id.clone(),
            project_name: project_name.to_string(),
            project_path: project_path.to_string(),
            created_at: now,
            updated_at: now,
            prompts: vec![initial_prompt.to_string()],
            files_created: Vec::new(),
            commands_executed: Vec::new(),
            status: SessionStatus::Active,
            iterations: 0,
        };

        self.save(&session).await?;
        log::info!("Created session: {}", session_id);
        Ok(session_id)
    }

    /// Load a session. A missing id is `Ok(None)`; a corrupt record is logged
    /// and treated as not found.
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        let path = self.session_file(session_id);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Session not found: {}", session_id);
                return Ok(None);
            }
            Err(e) => {
                return Err(AgentError::SessionError(format!(
                    "Failed to read session {}: {}",
                    session_id, e
                )))
            }
        };

        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                log::error!("Corrupt session record {}: {}", session_id, e);
                Ok(None)
            }
        }
    }

    /// Apply a partial update. File paths merge as a set union; prompts and
    /// commands append; status and iterations replace.
    pub async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<(), AgentError> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(session_id).await?.ok_or_else(|| {
            AgentError::SessionError(format!("Cannot update non-existent session: {}", session_id))
        })?;

        session.updated_at = Utc::now();

        if let Some(prompt) = update.new_prompt {
            session.prompts.push(prompt);
        }
        for path in update.files_created {
            if !session.files_created.contains(&path) {
                session.files_created.push(path);
            }
        }
        session.commands_executed.extend(update.commands_executed);
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(iterations) = update.iterations {
            session.iterations = iterations;
        }

        self.save(&session).await
    }

    pub async fn mark_complete(&self, session_id: &str) -> Result<(), AgentError> {
        self.update(
            session_id,
            SessionUpdate {
                status: Some(SessionStatus::Complete),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mark_failed(&self, session_id: &str) -> Result<(), AgentError> {
        self.update(
            session_id,
            SessionUpdate {
                status: Some(SessionStatus::Failed),
                ..Default::default()
            },
        )
        .await
    }

    /// List sessions, optionally filtered by status, most recently updated
    /// first. Unreadable records are skipped.
    pub async fn list(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<SessionSummary>, AgentError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| AgentError::SessionError(format!("Cannot read session dir: {}", e)))?;

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::SessionError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::error!("Failed to read session {}: {}", path.display(), e);
                    continue;
                }
            };
            let session: Session = match serde_json::from_str(&raw) {
                Ok(session) => session,
                Err(e) => {
                    log::error!("Skipping corrupt session {}: {}", path.display(), e);
                    continue;
                }
            };

            if status.map(|s| s == session.status).unwrap_or(true) {
                summaries.push(SessionSummary {
                    session_id: session.session_id,
                    project_name: session.project_name,
                    project_path: session.project_path,
                    created_at: session.created_at,
                    updated_at: session.updated_at,
                    status: session.status,
                    prompts_count: session.prompts.len(),
                    files_count: session.files_created.len(),
                });
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Render a session into the natural-language context block injected into
    /// the system prompt when resuming. Empty string when the id is unknown.
    pub async fn render_context(&self, session_id: &str) -> String {
        let Ok(Some(session)) = self.load(session_id).await else {
            return String::new();
        };

        let prompts = session
            .prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| format!("{}. {}", i + 1, prompt))
            .collect::<Vec<_>>()
            .join("\n");

        let mut files = session
            .files_created
            .iter()
            .take(20)
            .map(|file| format!("  - {}", file))
            .collect::<Vec<_>>()
            .join("\n");
        if session.files_created.len() > 20 {
            files.push_str(&format!(
                "\n  ... and {} more",
                session.files_created.len() - 20
            ));
        }

        let commands = session
            .commands_executed
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|cmd| format!("  $ {}", cmd))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "CONTINUING PROJECT SESSION: {name}\n\
             \n\
             Project Path: {path}\n\
             Created: {created}\n\
             Last Updated: {updated}\n\
             Status: {status:?}\n\
             Total Iterations: {iterations}\n\
             \n\
             PREVIOUS PROMPTS:\n{prompts}\n\
             \n\
             FILES CREATED ({file_count}):\n{files}\n\
             \n\
             RECENT COMMANDS ({command_count}):\n{commands}\n\
             \n\
             You are CONTINUING to work on this project. Remember what you've built.\n\
             The user wants to make changes or improvements to the existing project.",
            name = session.project_name,
            path = session.project_path,
            created = session.created_at.to_rfc3339(),
            updated = session.updated_at.to_rfc3339(),
            status = session.status,
            iterations = session.iterations,
            prompts = prompts,
            file_count = session.files_created.len(),
            files = files,
            command_count = session.commands_executed.len(),
            commands = commands,
        )
    }

    async fn save(&self, session: &Session) -> Result<(), AgentError> {
        let path = self.session_file(&session.session_id);
        let encoded = serde_json::to_string_pretty(session)
            .map_err(|e| AgentError::SessionError(format!("Failed to encode session: {}", e)))?;
        fs::write(&path, encoded)
            .await
            .map_err(|e| AgentError::SessionError(format!("Failed to save session: {}", e)))?;
        log::debug!("Saved session: {}", session.session_id);
        Ok(())
    }
}
