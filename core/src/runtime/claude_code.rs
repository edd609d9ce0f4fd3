use std::path::Path;

use async_trait::async_trait;

use super::{InitPlan, RuntimeAdapter};
use crate::command::CommandHelper;
use crate::registry::RuntimeKind;

/// Claude Code CLI adapter: runs `claude code --permission-mode
/// acceptEdits`, optionally with `--resume <id>`.
pub struct ClaudeCodeAdapter;

#[async_trait]
impl RuntimeAdapter for ClaudeCodeAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::ClaudeCode
    }

    fn init_commands(&self, cwd: &Path, resume_id: Option<&str>, flags: &[String]) -> InitPlan {
        let mut line = format!("cd {} && exec claude code", shell_quote(cwd));
        for flag in flags {
            line.push(' ');
            line.push_str(flag);
        }
        line.push_str(" --permission-mode acceptEdits");
        if let Some(id) = resume_id {
            line.push_str(&format!(" --resume {}", shell_quote_str(id)));
        }
        InitPlan {
            shell_lines: vec![line],
        }
    }

    fn ready_patterns(&self) -> Vec<String> {
        vec![
            "Welcome to Claude".to_string(),
            "claude-code>".to_string(),
            "Ready to assist".to_string(),
        ]
    }

    fn error_patterns(&self) -> Vec<String> {
        vec![
            "command not found".to_string(),
            "authentication required".to_string(),
            "Fatal error".to_string(),
        ]
    }

    fn exit_patterns(&self) -> Vec<String> {
        vec!["Agent powering down".to_string()]
    }

    async fn detect(&self, helper: &CommandHelper, session_name: &str) -> bool {
        helper.send_literal(session_name, "/").is_ok()
    }

    fn detect_resumable_id(&self, project_cwd: &Path) -> Option<String> {
        most_recently_modified_conversation(project_cwd, ".claude", "conversations")
    }
}

/// Best-effort: pick the most recently modified file under
/// `<project_cwd>/<dot_dir>/<conv_dir>`, named `<id>.jsonl` or similar,
/// and return its stem as the resumable id. Shared shape across
/// adapters that store conversations as per-id files.
pub(super) fn most_recently_modified_conversation(
    project_cwd: &Path,
    dot_dir: &str,
    conv_dir: &str,
) -> Option<String> {
    let dir = project_cwd.join(dot_dir).join(conv_dir);
    let entries = std::fs::read_dir(&dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            Some((modified, e.path()))
        })
        .max_by_key(|(m, _)| *m)
        .and_then(|(_, path)| path.file_stem().map(|s| s.to_string_lossy().to_string()))
}

pub(super) fn shell_quote(path: &Path) -> String {
    shell_quote_str(&path.to_string_lossy())
}

pub(super) fn shell_quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_commands_splices_resume_flag() {
        let adapter = ClaudeCodeAdapter;
        let plan = adapter.init_commands(Path::new("/tmp/p1"), Some("conv-123"), &[]);
        assert_eq!(plan.shell_lines.len(), 1);
        assert!(plan.shell_lines[0].contains("--resume 'conv-123'"));
    }

    #[test]
    fn init_commands_splices_runtime_flags_before_permission_mode() {
        let adapter = ClaudeCodeAdapter;
        let plan = adapter.init_commands(
            Path::new("/tmp/p1"),
            Some("conv-123"),
            &["--model".to_string(), "opus".to_string()],
        );
        let line = &plan.shell_lines[0];
        let flag_at = line.find("--model").expect("flag present");
        let permission_at = line.find("--permission-mode").expect("permission flag present");
        let resume_at = line.find("--resume").expect("resume flag present");
        assert!(flag_at < permission_at);
        assert!(permission_at < resume_at);
    }

    #[test]
    fn init_commands_without_resume_omits_flag() {
        let adapter = ClaudeCodeAdapter;
        let plan = adapter.init_commands(Path::new("/tmp/p1"), None, &[]);
        assert!(!plan.shell_lines[0].contains("--resume"));
    }

    #[test]
    fn ready_patterns_cover_known_banners() {
        let adapter = ClaudeCodeAdapter;
        assert!(adapter.ready_patterns().contains(&"Welcome to Claude".to_string()));
    }
}
