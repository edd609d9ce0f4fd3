use std::path::Path;

use async_trait::async_trait;

use super::claude_code::{most_recently_modified_conversation, shell_quote, shell_quote_str};
use super::{InitPlan, RuntimeAdapter};
use crate::registry::RuntimeKind;

/// Codex CLI adapter: runs `codex`.
pub struct CodexAdapter;

#[async_trait]
impl RuntimeAdapter for CodexAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Codex
    }

    fn init_commands(&self, cwd: &Path, resume_id: Option<&str>, flags: &[String]) -> InitPlan {
        let mut line = format!("cd {} && exec codex", shell_quote(cwd));
        if let Some(id) = resume_id {
            line.push_str(&format!(" --resume {}", shell_quote_str(id)));
        }
        for flag in flags {
            line.push(' ');
            line.push_str(flag);
        }
        InitPlan {
            shell_lines: vec![line],
        }
    }

    fn ready_patterns(&self) -> Vec<String> {
        vec!["codex>".to_string(), "Codex ready".to_string()]
    }

    fn error_patterns(&self) -> Vec<String> {
        vec!["command not found".to_string(), "failed to authenticate".to_string()]
    }

    fn exit_patterns(&self) -> Vec<String> {
        vec!["Goodbye".to_string()]
    }

    fn detect_resumable_id(&self, project_cwd: &Path) -> Option<String> {
        most_recently_modified_conversation(project_cwd, ".codex", "sessions")
    }
}
