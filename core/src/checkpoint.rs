//! State Checkpoint Store: atomic, versioned snapshots of conversations,
//! tasks, agents, and projects, with numbered-backup rotation and a
//! resume-instructions planner consumed by the orchestrator on boot.
//! Durability goes through [`crate::persist::atomic_write`] and
//! [`crate::persist::rotate_backups`], the same helpers the Scheduler
//! uses.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{state_dir, RuntimeConfig};
use crate::error::{CoreError, Result};
use crate::persist::{atomic_write, rotate_backups};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Open,
    InProgress,
    Paused,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub source: String,
    pub recent_messages: Vec<String>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub status: TaskState,
    pub progress_pct: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfImprovementSnapshot {
    pub description: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub hostname: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_sec: u64,
    pub restart_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: u64,
    pub version: u32,
    pub checkpointed_at: DateTime<Utc>,
    pub checkpoint_reason: String,
    pub conversations: Vec<ConversationSnapshot>,
    pub tasks: Vec<TaskSnapshot>,
    pub agents: Vec<AgentSnapshot>,
    pub projects: Vec<ProjectSnapshot>,
    pub self_improvement: Option<SelfImprovementSnapshot>,
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    fn empty(started_at: DateTime<Utc>, restart_count: u32) -> Self {
        Self {
            id: 0,
            version: SCHEMA_VERSION,
            checkpointed_at: started_at,
            checkpoint_reason: "initial".to_string(),
            conversations: Vec::new(),
            tasks: Vec::new(),
            agents: Vec::new(),
            projects: Vec::new(),
            self_improvement: None,
            metadata: CheckpointMetadata {
                hostname: hostname(),
                pid: std::process::id(),
                started_at,
                uptime_sec: 0,
                restart_count,
            },
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeInstructions {
    pub tasks_to_resume: Vec<TaskSnapshot>,
    pub conversations_to_resume: Vec<ConversationSnapshot>,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub severity: String,
    pub message: String,
}

pub struct CheckpointStore {
    cfg: Arc<RuntimeConfig>,
    namespace: String,
    state: Mutex<Checkpoint>,
    saving: Mutex<bool>,
    dirty: Mutex<bool>,
    started_at: DateTime<Utc>,
}

impl CheckpointStore {
    pub fn new(cfg: Arc<RuntimeConfig>, namespace: &str) -> Self {
        let started_at = Utc::now();
        Self {
            cfg,
            namespace: namespace.to_string(),
            state: Mutex::new(Checkpoint::empty(started_at, 0)),
            saving: Mutex::new(false),
            dirty: Mutex::new(false),
            started_at,
        }
    }

    fn namespace_dir(&self) -> std::path::PathBuf {
        state_dir(&self.cfg, &self.namespace)
    }

    fn state_path(&self) -> std::path::PathBuf {
        self.namespace_dir().join("state.json")
    }

    fn backups_dir(&self) -> std::path::PathBuf {
        self.namespace_dir().join("backups")
    }

    /// Load the previous checkpoint, if any, falling back through
    /// backups newest-first on schema mismatch or corruption. Returns
    /// `None` only when no readable checkpoint exists at all.
    pub fn initialize(&self) -> Result<Option<Checkpoint>> {
        if let Some(loaded) = self.try_read(&self.state_path()) {
            let mut restart_count = loaded.metadata.restart_count;
            restart_count = restart_count.saturating_add(1);
            let mut fresh = Checkpoint::empty(self.started_at, restart_count);
            fresh.id = loaded.id;
            *self.state.lock().expect("state mutex") = fresh;
            return Ok(Some(loaded));
        }

        for n in 1..=self.cfg.backup_retention {
            let path = self.backups_dir().join(format!("state.{n}.bak"));
            if let Some(loaded) = self.try_read(&path) {
                let restart_count = loaded.metadata.restart_count.saturating_add(1);
                let mut fresh = Checkpoint::empty(self.started_at, restart_count);
                fresh.id = loaded.id;
                *self.state.lock().expect("state mutex") = fresh;
                return Ok(Some(loaded));
            }
        }

        Ok(None)
    }

    fn try_read(&self, path: &std::path::Path) -> Option<Checkpoint> {
        let data = std::fs::read_to_string(path).ok()?;
        let checkpoint: Checkpoint = serde_json::from_str(&data).ok()?;
        if checkpoint.version != SCHEMA_VERSION {
            return None;
        }
        Some(checkpoint)
    }

    /// Atomic versioned write: rotate backups, write a fresh numbered
    /// backup, then write `state.json` itself.
    pub fn save(&self, reason: &str) -> Result<()> {
        {
            let mut saving = self.saving.lock().expect("saving mutex");
            if *saving {
                *self.dirty.lock().expect("dirty mutex") = true;
                return Ok(());
            }
            *saving = true;
        }

        let result = self.save_now(reason);

        *self.saving.lock().expect("saving mutex") = false;
        if std::mem::take(&mut *self.dirty.lock().expect("dirty mutex")) {
            return self.save_now("periodic");
        }
        result
    }

    fn save_now(&self, reason: &str) -> Result<()> {
        let json = {
            let mut guard = self.state.lock().expect("state mutex");
            guard.id += 1;
            guard.checkpointed_at = Utc::now();
            guard.checkpoint_reason = reason.to_string();
            guard.metadata.uptime_sec = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
            serde_json::to_vec_pretty(&*guard).map_err(|e| CoreError::StateCorrupt(e.to_string()))?
        };

        let backup_target = rotate_backups(&self.backups_dir(), "state", self.cfg.backup_retention)?;
        atomic_write(&backup_target, &json)?;
        atomic_write(&self.state_path(), &json)
    }

    /// Explicit tagged backup, independent of the rotation sequence.
    pub fn create_backup(&self, tag: &str) -> Result<String> {
        let json = {
            let guard = self.state.lock().expect("state mutex");
            serde_json::to_vec_pretty(&*guard).map_err(|e| CoreError::StateCorrupt(e.to_string()))?
        };
        let id = format!("tag-{tag}-{}", Utc::now().timestamp());
        let path = self.backups_dir().join(format!("{id}.bak"));
        atomic_write(&path, &json)?;
        Ok(id)
    }

    pub fn restore_from_backup(&self, id: &str) -> Result<bool> {
        let path = self.backups_dir().join(format!("{id}.bak"));
        match self.try_read(&path) {
            Some(checkpoint) => {
                *self.state.lock().expect("state mutex") = checkpoint;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_backups(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.backups_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .filter(|n| n.ends_with(".bak"))
            .collect()
    }

    pub fn update_conversation(&self, snapshot: ConversationSnapshot) {
        let mut guard = self.state.lock().expect("state mutex");
        let max = self.cfg.max_recent_messages;
        let mut snapshot = snapshot;
        if snapshot.recent_messages.len() > max {
            let drop = snapshot.recent_messages.len() - max;
            snapshot.recent_messages.drain(..drop);
        }
        if let Some(existing) = guard.conversations.iter_mut().find(|c| c.id == snapshot.id) {
            *existing = snapshot;
        } else {
            guard.conversations.push(snapshot);
        }
    }

    pub fn update_task(&self, snapshot: TaskSnapshot) {
        let mut guard = self.state.lock().expect("state mutex");
        if let Some(existing) = guard.tasks.iter_mut().find(|t| t.id == snapshot.id) {
            *existing = snapshot;
        } else {
            guard.tasks.push(snapshot);
        }
    }

    pub fn update_agent(&self, snapshot: AgentSnapshot) {
        let mut guard = self.state.lock().expect("state mutex");
        if let Some(existing) = guard.agents.iter_mut().find(|a| a.id == snapshot.id) {
            *existing = snapshot;
        } else {
            guard.agents.push(snapshot);
        }
    }

    pub fn update_project(&self, snapshot: ProjectSnapshot) {
        let mut guard = self.state.lock().expect("state mutex");
        if let Some(existing) = guard.projects.iter_mut().find(|p| p.id == snapshot.id) {
            *existing = snapshot;
        } else {
            guard.projects.push(snapshot);
        }
    }

    pub fn update_self_improvement(&self, snapshot: SelfImprovementSnapshot) {
        self.state.lock().expect("state mutex").self_improvement = Some(snapshot);
    }

    pub fn clear_self_improvement(&self) {
        self.state.lock().expect("state mutex").self_improvement = None;
    }

    pub fn remove_task(&self, id: &str) {
        self.state.lock().expect("state mutex").tasks.retain(|t| t.id != id);
    }

    pub fn remove_conversation(&self, id: &str) {
        self.state
            .lock()
            .expect("state mutex")
            .conversations
            .retain(|c| c.id != id);
    }

    /// Saves with reason `before_restart`.
    pub fn prepare_for_shutdown(&self) -> Result<()> {
        self.save("before_restart")
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.state.lock().expect("state mutex").clone()
    }

    /// In-progress/paused tasks and recently-active conversations from
    /// `prev`, plus a notification if self-improvement was mid-flight.
    pub fn generate_resume_instructions(&self, prev: &Checkpoint) -> ResumeInstructions {
        let tasks_to_resume: Vec<TaskSnapshot> = prev
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskState::InProgress | TaskState::Paused))
            .cloned()
            .collect();

        let window = chrono::Duration::from_std(self.cfg.resume_conv_window).unwrap_or_default();
        let now = Utc::now();
        let conversations_to_resume: Vec<ConversationSnapshot> = prev
            .conversations
            .iter()
            .filter(|c| now - c.last_activity_at <= window)
            .cloned()
            .collect();

        let mut notifications = Vec::new();
        if let Some(improvement) = &prev.self_improvement {
            notifications.push(Notification {
                severity: "info".to_string(),
                message: format!(
                    "self-improvement in progress since {}: {}",
                    improvement.started_at, improvement.description
                ),
            });
        }

        ResumeInstructions {
            tasks_to_resume,
            conversations_to_resume,
            notifications,
        }
    }
}

/// Optional periodic-checkpoint timer.
pub async fn run_periodic_checkpoint(store: Arc<CheckpointStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = store.save("periodic") {
            tracing::warn!(error = %e, "periodic checkpoint save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> CheckpointStore {
        let mut cfg = RuntimeConfig::default();
        cfg.home = dir.to_path_buf();
        cfg.backup_retention = 3;
        cfg.resume_conv_window = Duration::from_secs(3600);
        CheckpointStore::new(Arc::new(cfg), "orchestrator")
    }

    #[test]
    fn save_then_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "write docs".to_string(),
            status: TaskState::InProgress,
            progress_pct: 50,
        });
        store.save("before_restart").unwrap();

        let restarted = store_in(dir.path());
        let prev = restarted.initialize().unwrap().expect("state exists");
        assert_eq!(prev.tasks.len(), 1);
        assert_eq!(prev.tasks[0].id, "t1");
    }

    #[test]
    fn resume_instructions_match_scenario_six() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update_conversation(ConversationSnapshot {
            id: "c1".to_string(),
            source: "chat".to_string(),
            recent_messages: vec!["a".into(), "b".into(), "c".into()],
            last_activity_at: Utc::now(),
        });
        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "deploy".to_string(),
            status: TaskState::InProgress,
            progress_pct: 50,
        });
        store.save("before_restart").unwrap();

        let restarted = store_in(dir.path());
        let prev = restarted.initialize().unwrap().unwrap();
        let instructions = restarted.generate_resume_instructions(&prev);
        assert_eq!(instructions.tasks_to_resume.len(), 1);
        assert_eq!(instructions.tasks_to_resume[0].id, "t1");
        assert!(instructions.conversations_to_resume.iter().any(|c| c.id == "c1"));
    }

    #[test]
    fn corrupt_state_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "x".to_string(),
            status: TaskState::Open,
            progress_pct: 0,
        });
        store.save("manual").unwrap();

        std::fs::write(store.state_path(), b"{not json").unwrap();

        let restarted = store_in(dir.path());
        let prev = restarted.initialize().unwrap();
        assert!(prev.is_some());
    }

    #[test]
    fn restore_from_backup_then_save_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "original".to_string(),
            status: TaskState::Open,
            progress_pct: 0,
        });
        let backup_id = store.create_backup("before-change").unwrap();

        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "changed".to_string(),
            status: TaskState::Done,
            progress_pct: 100,
        });
        store.save("manual").unwrap();

        assert!(store.restore_from_backup(&backup_id).unwrap());
        store.save("restored").unwrap();

        let reopened = store_in(dir.path());
        let prev = reopened.initialize().unwrap().expect("state exists on disk");
        assert_eq!(prev.tasks[0].title, "original");
    }

    #[test]
    fn no_previous_state_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.initialize().unwrap().is_none());
    }

    #[test]
    fn conversation_messages_capped_at_max_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = RuntimeConfig::default();
        cfg.home = dir.path().to_path_buf();
        cfg.max_recent_messages = 2;
        let store = CheckpointStore::new(Arc::new(cfg), "orchestrator");
        store.update_conversation(ConversationSnapshot {
            id: "c1".to_string(),
            source: "chat".to_string(),
            recent_messages: vec!["a".into(), "b".into(), "c".into()],
            last_activity_at: Utc::now(),
        });
        let snap = store.snapshot();
        assert_eq!(snap.conversations[0].recent_messages, vec!["b", "c"]);
    }
}
