//! Runtime Adapter strategy: per-runtime-kind knowledge of how to
//! start it, what its ready/error/exit output looks like, and how to
//! discover a resumable conversation id. The only channel into a
//! runtime is its PTY byte stream, so every adapter works by matching
//! plain-text patterns rather than a structured protocol.

mod claude_code;
mod codex;
mod generic;
mod gemini_cli;

pub use claude_code::ClaudeCodeAdapter;
pub use codex::CodexAdapter;
pub use generic::GenericAdapter;
pub use gemini_cli::GeminiCliAdapter;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::CommandHelper;
use crate::registry::RuntimeKind;

/// Commands to send to the login shell to start the in-PTY runtime.
#[derive(Debug, Clone)]
pub struct InitPlan {
    pub shell_lines: Vec<String>,
}

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Shell lines to send to start the runtime; `--resume <id>` and
    /// permission flags are spliced in here, adapter-locally.
    fn init_commands(&self, cwd: &Path, resume_id: Option<&str>, flags: &[String]) -> InitPlan;

    /// Ordered substrings/regex that, appearing within `READY_TIMEOUT`,
    /// confirm initialization.
    fn ready_patterns(&self) -> Vec<String>;

    /// Substrings that, at any time, indicate a fatal startup error.
    fn error_patterns(&self) -> Vec<String>;

    /// Regex set matched against the rolling buffer to detect exit.
    fn exit_patterns(&self) -> Vec<String>;

    /// Optional probe to verify the runtime truly matches this adapter.
    async fn detect(&self, _helper: &CommandHelper, _session_name: &str) -> bool {
        false
    }

    /// Optional side effect once the session is ready (e.g. materialize
    /// a tool config file).
    async fn post_initialize(&self, _session_name: &str, _project_cwd: &Path) {}

    /// Best-effort discovery of an externally stored conversation id.
    fn detect_resumable_id(&self, _project_cwd: &Path) -> Option<String> {
        None
    }
}

pub fn for_kind(kind: RuntimeKind) -> Box<dyn RuntimeAdapter> {
    match kind {
        RuntimeKind::ClaudeCode => Box::new(ClaudeCodeAdapter),
        RuntimeKind::GeminiCli => Box::new(GeminiCliAdapter),
        RuntimeKind::Codex => Box::new(CodexAdapter),
        RuntimeKind::Generic => Box::new(GenericAdapter),
    }
}

/// Lower bound on readiness; adapters may take longer in practice, but
/// the Supervisor never waits less than this.
pub const MIN_READY_TIMEOUT: Duration = Duration::from_secs(45);
