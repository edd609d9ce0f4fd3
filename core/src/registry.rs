//! Session Registry: a serialized map from session name to the live PTY
//! + metadata.
//!
//! `DashMap` shards its locking internally, so registry methods are
//! safe to call back into from within a listener callback fired on
//! another worker thread.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::history::CircularBuffer;
use crate::pty::PtyProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    ClaudeCode,
    GeminiCli,
    Codex,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Ready,
    Active,
    Idle,
    Inactive,
    Exiting,
}

/// Essential attributes of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub name: String,
    pub cwd: String,
    pub pid: u32,
    pub runtime_kind: RuntimeKind,
    pub role: String,
    pub team_id: Option<String>,
    pub member_id: Option<String>,
    pub resumable_session_id: Option<String>,
    pub created_at: u64,
    pub status: SessionStatus,
}

/// One live session: owns its PTY process, the metadata describing it,
/// and its raw terminal history buffer. The activity record is owned
/// by the Activity Tracker (keyed by session name), not stored here.
pub struct Session {
    pub meta: std::sync::RwLock<SessionMeta>,
    pub pty: Arc<PtyProcess>,
    pub history: Arc<CircularBuffer>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.meta.read().expect("meta lock").status
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.meta.write().expect("meta lock").status = status;
    }
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all live sessions, keyed by unique name.
#[derive(Clone)]
pub struct Registry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Insert a newly created session. Rejects a duplicate name without
    /// touching the existing entry. Wires a listener that feeds the
    /// session's raw history buffer from its PTY byte stream.
    pub fn create(&self, meta: SessionMeta, pty: Arc<PtyProcess>) -> Result<Arc<Session>> {
        if self.sessions.contains_key(&meta.name) {
            return Err(CoreError::AlreadyExists(meta.name.clone()));
        }
        let history = Arc::new(CircularBuffer::new());
        let history_listener = Arc::clone(&history);
        let _ = pty.on_data(Box::new(move |bytes| history_listener.push(bytes)));
        let session = Arc::new(Session {
            meta: std::sync::RwLock::new(meta.clone()),
            pty,
            history,
        });
        self.sessions.insert(meta.name.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Up to the last `lines` lines of raw terminal history for `name`.
    /// Does not consume the buffer.
    pub fn capture_tail(&self, name: &str, lines: usize) -> Result<String> {
        let session = self.get(name).ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        Ok(session.history.tail_lines(lines))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn list(&self) -> Vec<SessionMeta> {
        self.sessions
            .iter()
            .map(|e| e.value().meta.read().expect("meta lock").clone())
            .collect()
    }

    /// Kill and remove a session from the registry.
    pub fn kill(&self, name: &str) -> Result<()> {
        let session = self
            .sessions
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        session.set_status(SessionStatus::Exiting);
        session.pty.kill()?;
        self.sessions.remove(name);
        Ok(())
    }

    /// Remove a session entry without killing the PTY (used after the
    /// PTY has already exited on its own).
    pub fn remove(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.remove(name).map(|(_, v)| v)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        if self.sessions.contains_key(new) {
            return Err(CoreError::AlreadyExists(new.to_string()));
        }
        let (_, session) = self
            .sessions
            .remove(old)
            .ok_or_else(|| CoreError::NotFound(old.to_string()))?;
        session.meta.write().expect("meta lock").name = new.to_string();
        self.sessions.insert(new.to_string(), session);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::pty::SpawnOptions;

    fn spawn_cat() -> Arc<PtyProcess> {
        let opts = SpawnOptions {
            cwd: std::env::temp_dir(),
            shell: "/bin/sh".into(),
            argv: vec!["/bin/cat".into()],
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        };
        Arc::new(PtyProcess::spawn(&opts, 8, 8).expect("spawn cat"))
    }

    fn meta(name: &str) -> SessionMeta {
        SessionMeta {
            name: name.to_string(),
            cwd: "/tmp".to_string(),
            pid: 0,
            runtime_kind: RuntimeKind::Generic,
            role: "developer".to_string(),
            team_id: None,
            member_id: None,
            resumable_session_id: None,
            created_at: unix_now_secs(),
            status: SessionStatus::Starting,
        }
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let registry = Registry::new();
        let pty = spawn_cat();
        registry.create(meta("dev-1"), Arc::clone(&pty)).unwrap();
        let err = registry.create(meta("dev-1"), pty);
        assert!(matches!(err, Err(CoreError::AlreadyExists(_))));
        registry.kill("dev-1").unwrap();
    }

    #[test]
    fn kill_removes_from_registry() {
        let registry = Registry::new();
        let pty = spawn_cat();
        registry.create(meta("dev-2"), pty).unwrap();
        assert!(registry.exists("dev-2"));
        registry.kill("dev-2").unwrap();
        assert!(!registry.exists("dev-2"));
    }

    #[test]
    fn kill_unknown_session_errors() {
        let registry = Registry::new();
        assert!(matches!(registry.kill("ghost"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn capture_tail_reads_pty_output() {
        let registry = Registry::new();
        let pty = spawn_cat();
        registry.create(meta("dev-3"), Arc::clone(&pty)).unwrap();
        pty.write(b"hello\r").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        let tail = registry.capture_tail("dev-3", 10).unwrap();
        assert!(tail.contains("hello"));
        registry.kill("dev-3").unwrap();
    }

    #[test]
    fn capture_tail_unknown_session_errors() {
        let registry = Registry::new();
        assert!(matches!(registry.capture_tail("ghost", 10), Err(CoreError::NotFound(_))));
    }
}
