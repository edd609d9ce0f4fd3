use std::path::Path;

use async_trait::async_trait;

use super::claude_code::{most_recently_modified_conversation, shell_quote, shell_quote_str};
use super::{InitPlan, RuntimeAdapter};
use crate::registry::RuntimeKind;

/// Gemini CLI adapter: runs `gemini`.
pub struct GeminiCliAdapter;

#[async_trait]
impl RuntimeAdapter for GeminiCliAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::GeminiCli
    }

    fn init_commands(&self, cwd: &Path, resume_id: Option<&str>, flags: &[String]) -> InitPlan {
        let mut line = format!("cd {} && exec gemini", shell_quote(cwd));
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
        vec!["Gemini CLI".to_string(), "gemini>".to_string()]
    }

    fn error_patterns(&self) -> Vec<String> {
        vec!["command not found".to_string(), "API key not found".to_string()]
    }

    fn exit_patterns(&self) -> Vec<String> {
        vec!["Session ended".to_string()]
    }

    fn detect_resumable_id(&self, project_cwd: &Path) -> Option<String> {
        most_recently_modified_conversation(project_cwd, ".gemini", "sessions")
    }
}
