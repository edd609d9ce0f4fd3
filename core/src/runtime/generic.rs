use std::path::Path;

use async_trait::async_trait;

use super::{InitPlan, RuntimeAdapter};
use crate::registry::RuntimeKind;

/// Plain login shell, no runtime attached. Used when no CLI tool is
/// configured or the runtime binary is absent; the caller may still
/// create a shell session.
pub struct GenericAdapter;

#[async_trait]
impl RuntimeAdapter for GenericAdapter {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Generic
    }

    fn init_commands(&self, _cwd: &Path, _resume_id: Option<&str>, _flags: &[String]) -> InitPlan {
        InitPlan {
            shell_lines: vec![],
        }
    }

    fn ready_patterns(&self) -> Vec<String> {
        vec!["$".to_string()]
    }

    fn error_patterns(&self) -> Vec<String> {
        vec![]
    }

    fn exit_patterns(&self) -> Vec<String> {
        vec!["logout".to_string(), "exit".to_string()]
    }
}
