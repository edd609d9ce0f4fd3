//! External Task Registry contract. Opaque to the core except for the
//! three fields it reads. The actual store lives outside this crate;
//! core only needs a way to ask "does this member have work in flight".

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    Assigned,
    Active,
    Blocked,
    Done,
    Failed,
}

impl TaskStatus {
    /// Statuses that justify an auto-restart on session exit.
    pub fn warrants_restart(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Active | TaskStatus::Blocked)
    }
}

#[derive(Debug, Clone)]
pub struct TaskRef {
    pub assigned_member_id: String,
    pub status: TaskStatus,
    pub task_file_path: String,
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Whether `member_id` has at least one task in a status that
    /// warrants restarting its session after an exit.
    async fn has_restart_worthy_task(&self, member_id: &str) -> bool;
}

/// Test/degenerate implementation: never restarts.
pub struct NoTasksRegistry;

#[async_trait]
impl TaskRegistry for NoTasksRegistry {
    async fn has_restart_worthy_task(&self, _member_id: &str) -> bool {
        false
    }
}
