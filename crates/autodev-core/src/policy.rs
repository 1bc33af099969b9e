//! Permission gating for tool execution.
//!
//! The gate is a plain predicate over the parsed tool request, evaluated
//! fresh on every dispatch. A denial becomes an ordinary tool-result string
//! fed back to the model; it never aborts the run.

use crate::tools::ToolRequest;

pub trait ApprovalPolicy: Send + Sync {
    fn allows(&self, request: &ToolRequest) -> bool;
}

/// Unrestricted autonomous operation. The default.
pub struct AllowAll;

impl ApprovalPolicy for AllowAll {
    fn allows(&self, _request: &ToolRequest) -> bool {
        true
    }
}

/// Denies every side-effecting tool. `task_complete` stays allowed so a
/// locked-down agent can still terminate cleanly.
pub struct DenyAll;

impl ApprovalPolicy for DenyAll {
    fn allows(&self, request: &ToolRequest) -> bool {
        matches!(request, ToolRequest::TaskComplete(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CompletionPayload, CreateFileArgs};

    #[test]
    fn test_deny_all_still_allows_completion() {
        let policy = DenyAll;
        assert!(!policy.allows(&ToolRequest::CreateFile(CreateFileArgs {
            file_path: "a.txt".to_string(),
            content: String::new(),
        })));
        assert!(policy.allows(&ToolRequest::TaskComplete(CompletionPayload {
            summary: "done".to_string(),
            project_path: None,
        })));
    }
}
