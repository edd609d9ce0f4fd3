//! Session Supervisor: orchestrates session creation, drives init
//! through the Runtime Adapter + Command Helper, awaits readiness, arms
//! the Output Monitor and Activity Tracker, and — as the bound
//! [`ExitHandler`] — decides restart-vs-inactive when the Monitor
//! confirms an exit. Owns the kill-escalation sequence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::activity::ActivityTracker;
use crate::command::CommandHelper;
use crate::config::{state_dir, RuntimeConfig};
use crate::error::{CoreError, Result};
use crate::events::{session_role_for, EventBus, SessionEvent, StatusReason};
use crate::exit_handler::{ExitDecision, ExitHandler, ExitInfo};
use crate::history::CircularBuffer;
use crate::memory::MemorySink;
use crate::monitor::OutputMonitor;
use crate::persist::atomic_write;
use crate::pty;
use crate::registry::{unix_now_secs, Registry, RuntimeKind, SessionMeta, SessionStatus};
use crate::runtime::{self, RuntimeAdapter};
use crate::task_registry::TaskRegistry;

/// Input to session creation.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name: String,
    pub cwd: PathBuf,
    pub runtime_kind: RuntimeKind,
    pub role: String,
    pub team_id: Option<String>,
    pub member_id: Option<String>,
    pub shell: String,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub runtime_flags: Vec<String>,
}

fn validate_session_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!(
            "session name must match [A-Za-z0-9_-]+: {name}"
        )))
    }
}

pub struct Supervisor {
    cfg: Arc<RuntimeConfig>,
    registry: Registry,
    events: EventBus,
    command: CommandHelper,
    monitor: Arc<OutputMonitor>,
    activity: Arc<ActivityTracker>,
    task_registry: Arc<dyn TaskRegistry>,
    create_opts: DashMap<String, SessionOptions>,
    index_path: PathBuf,
}

impl Supervisor {
    /// Constructs the Supervisor together with its Output Monitor,
    /// binding the Monitor's lazy exit-handler resolver to the new
    /// Supervisor. `namespace` scopes the on-disk session index the
    /// same way it scopes the Scheduler and Checkpoint Store state
    /// files.
    pub fn new(
        cfg: Arc<RuntimeConfig>,
        registry: Registry,
        events: EventBus,
        activity: Arc<ActivityTracker>,
        task_registry: Arc<dyn TaskRegistry>,
        memory: Arc<dyn MemorySink>,
        namespace: &str,
    ) -> Arc<Self> {
        let exit_resolver = Arc::new(crate::resolver::LateBound::new());
        let monitor = Arc::new(OutputMonitor::new(
            Arc::clone(&cfg),
            registry.clone(),
            events.clone(),
            Arc::clone(&exit_resolver),
            memory,
        ));
        let index_path = state_dir(&cfg, namespace).join("sessions.json");
        let supervisor = Arc::new(Self {
            command: CommandHelper::new(registry.clone(), cfg.send_cr_delay),
            cfg,
            registry,
            events,
            monitor,
            activity,
            task_registry,
            create_opts: DashMap::new(),
            index_path,
        });
        exit_resolver.set(Arc::clone(&supervisor) as Arc<dyn ExitHandler>);
        supervisor
    }

    /// Best-effort snapshot of the registry for out-of-process
    /// inspection (the `session ls` CLI command reads this file; it
    /// never talks to a live Supervisor).
    fn persist_index(&self) {
        let metas = self.registry.list();
        if let Ok(json) = serde_json::to_vec_pretty(&metas) {
            let _ = atomic_write(&self.index_path, &json);
        }
    }

    /// Read a previously persisted session index; used by CLI
    /// invocations that are not the long-running `serve` process.
    pub fn read_index(cfg: &RuntimeConfig, namespace: &str) -> Vec<SessionMeta> {
        let path = state_dir(cfg, namespace).join("sessions.json");
        std::fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn monitor(&self) -> Arc<OutputMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn history_for(&self, name: &str) -> Option<Arc<CircularBuffer>> {
        self.registry.get(name).map(|s| Arc::clone(&s.history))
    }

    /// Validates the name, spawns the PTY, registers the session,
    /// drives the runtime adapter's init sequence, awaits readiness,
    /// then arms the Output Monitor and Activity Tracker.
    pub async fn create_session(&self, opts: SessionOptions) -> Result<()> {
        validate_session_name(&opts.name)?;
        if self.registry.exists(&opts.name) {
            return Err(CoreError::AlreadyExists(opts.name.clone()));
        }

        let spawn_opts = pty::SpawnOptions {
            cwd: opts.cwd.clone(),
            shell: opts.shell.clone(),
            argv: vec![opts.shell.clone()],
            env: opts.env.clone(),
            cols: opts.cols,
            rows: opts.rows,
        };
        spawn_opts.validate(self.cfg.max_cols, self.cfg.max_rows)?;

        let pty = Arc::new(pty::PtyProcess::spawn(
            &spawn_opts,
            self.cfg.max_data_listeners,
            self.cfg.max_exit_listeners,
        )?);

        let meta = SessionMeta {
            name: opts.name.clone(),
            cwd: opts.cwd.to_string_lossy().to_string(),
            pid: pty.pid(),
            runtime_kind: opts.runtime_kind,
            role: opts.role.clone(),
            team_id: opts.team_id.clone(),
            member_id: opts.member_id.clone(),
            resumable_session_id: None,
            created_at: unix_now_secs(),
            status: SessionStatus::Starting,
        };
        self.registry.create(meta, Arc::clone(&pty))?;

        let activity = Arc::clone(&self.activity);
        let name_for_activity = opts.name.clone();
        let _ = pty.on_data(Box::new(move |_| activity.record_pty_activity(&name_for_activity)));

        self.events.publish(SessionEvent::Created {
            name: opts.name.clone(),
            role: opts.role.clone(),
            team_id: opts.team_id.clone(),
        });

        let adapter = runtime::for_kind(opts.runtime_kind);
        let resumable = adapter.detect_resumable_id(&opts.cwd);
        if let (Some(session), Some(id)) = (self.registry.get(&opts.name), resumable.clone()) {
            session.meta.write().expect("meta lock").resumable_session_id = Some(id);
        }

        let init = adapter.init_commands(&opts.cwd, resumable.as_deref(), &opts.runtime_flags);
        for line in &init.shell_lines {
            if let Err(e) = self.command.send_message(&opts.name, line).await {
                self.abort_creation(&opts.name).await;
                return Err(e);
            }
        }

        let ready_timeout = self.cfg.ready_timeout.max(runtime::MIN_READY_TIMEOUT);
        if let Err(e) = self.await_ready(&opts.name, adapter.as_ref(), ready_timeout).await {
            self.abort_creation(&opts.name).await;
            self.events.publish(SessionEvent::Status {
                name: opts.name.clone(),
                status: SessionStatus::Inactive,
                reason: StatusReason::ReadinessTimeout,
                session_role: session_role_for(&opts.name, &self.cfg.orchestrator_session),
                error: Some(e.to_string()),
            });
            return Err(e);
        }

        self.monitor.start_monitoring(
            &opts.name,
            opts.runtime_kind,
            opts.role.clone(),
            opts.team_id.clone(),
            opts.member_id.clone(),
            adapter.exit_patterns(),
        );
        self.activity.record_pty_activity(&opts.name);
        adapter.post_initialize(&opts.name, &opts.cwd).await;

        if let Some(session) = self.registry.get(&opts.name) {
            session.set_status(SessionStatus::Ready);
        }
        self.create_opts.insert(opts.name.clone(), opts.clone());
        self.persist_index();
        self.events.publish(SessionEvent::Ready {
            name: opts.name.clone(),
        });

        Ok(())
    }

    /// Poll the session's output (a buffer local to this call, distinct
    /// from both the Monitor's rolling buffer and the history buffer)
    /// until a ready or error pattern appears, or `timeout` elapses.
    async fn await_ready(
        &self,
        name: &str,
        adapter: &dyn RuntimeAdapter,
        timeout: Duration,
    ) -> Result<()> {
        let session = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;

        let buffer: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let buffer_listener = Arc::clone(&buffer);
        let listener_id = session
            .pty
            .on_data(Box::new(move |bytes| {
                let mut g = buffer_listener.lock().expect("ready buffer mutex");
                g.push_str(&String::from_utf8_lossy(bytes));
            }))?;

        let ready_patterns = adapter.ready_patterns();
        let error_patterns = adapter.error_patterns();

        let outcome = tokio::time::timeout(timeout, async {
            loop {
                {
                    let g = buffer.lock().expect("ready buffer mutex");
                    if error_patterns.iter().any(|p| g.contains(p.as_str())) {
                        return Err(CoreError::InvalidArgument(
                            "runtime reported a fatal startup error".to_string(),
                        ));
                    }
                    if ready_patterns.iter().any(|p| g.contains(p.as_str())) {
                        return Ok(());
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        session.pty.unsubscribe_data(listener_id);

        match outcome {
            Ok(inner) => inner,
            Err(_) => Err(CoreError::ReadyTimeout(timeout)),
        }
    }

    async fn abort_creation(&self, name: &str) {
        if let Some(session) = self.registry.get(name) {
            let _ = session.pty.kill();
        }
        self.registry.remove(name);
        self.activity.forget(name);
    }

    fn cleanup_after_exit(&self, name: &str) {
        self.registry.remove(name);
        self.activity.forget(name);
        self.create_opts.remove(name);
        self.persist_index();
    }

    /// SIGTERM, wait `force_kill_escalation_delay`, then SIGKILL to both
    /// the pid and its process group.
    pub async fn kill_session(&self, name: &str) -> Result<()> {
        let session = self
            .registry
            .get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        session.set_status(SessionStatus::Exiting);
        self.monitor.stop_monitoring(name);

        if let Ok(tail) = self.command.capture_pane(name, crate::command::default_capture_lines()) {
            tracing::debug!(session = %name, tail = %tail, "captured tail before kill");
        }

        let pid = session.pty.pid();
        pty::signal_process(pid, sigterm())?;
        tokio::time::sleep(self.cfg.force_kill_escalation_delay).await;
        if session.pty.is_alive() {
            let _ = pty::signal_process(pid, sigkill());
            let _ = pty::kill_process_group(pid, sigkill());
        }
        let _ = session.pty.kill();

        self.cleanup_after_exit(name);

        self.events.publish(SessionEvent::Status {
            name: name.to_string(),
            status: SessionStatus::Inactive,
            reason: StatusReason::Killed,
            session_role: session_role_for(name, &self.cfg.orchestrator_session),
            error: None,
        });
        Ok(())
    }
}

#[cfg(unix)]
fn sigterm() -> nix::sys::signal::Signal {
    nix::sys::signal::Signal::SIGTERM
}

#[cfg(unix)]
fn sigkill() -> nix::sys::signal::Signal {
    nix::sys::signal::Signal::SIGKILL
}

#[cfg(not(unix))]
fn sigterm() {}

#[cfg(not(unix))]
fn sigkill() {}

#[async_trait]
impl ExitHandler for Supervisor {
    /// The reserved orchestrator session never restarts; a member with
    /// a restart-worthy task gets one recreate attempt under the same
    /// name before falling back to `Inactive`.
    async fn on_exit_detected(&self, info: ExitInfo) -> ExitDecision {
        if info.name == self.cfg.orchestrator_session {
            self.cleanup_after_exit(&info.name);
            return ExitDecision::Inactive;
        }

        let restart_worthy = match &info.member_id {
            Some(member_id) => self.task_registry.has_restart_worthy_task(member_id).await,
            None => false,
        };
        if !restart_worthy {
            self.cleanup_after_exit(&info.name);
            return ExitDecision::Inactive;
        }

        let opts = match self.create_opts.get(&info.name) {
            Some(entry) => entry.value().clone(),
            None => {
                self.cleanup_after_exit(&info.name);
                return ExitDecision::Inactive;
            }
        };

        self.registry.remove(&info.name);
        self.activity.forget(&info.name);

        match self.create_session(opts).await {
            Ok(()) => ExitDecision::Restarted,
            Err(_) => {
                self.cleanup_after_exit(&info.name);
                ExitDecision::Inactive
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_registry::NoTasksRegistry;

    fn test_supervisor() -> Arc<Supervisor> {
        let mut cfg = RuntimeConfig::default();
        cfg.ready_timeout = Duration::from_secs(2);
        cfg.send_cr_delay = Duration::from_millis(5);
        cfg.home = tempfile::tempdir().unwrap().into_path();
        let cfg = Arc::new(cfg);
        let registry = Registry::new();
        let activity = Arc::new(ActivityTracker::new(Arc::clone(&cfg)));
        Supervisor::new(
            cfg,
            registry,
            EventBus::new(),
            activity,
            Arc::new(NoTasksRegistry),
            Arc::new(crate::memory::NoopMemorySink),
            "test",
        )
    }

    fn generic_opts(name: &str) -> SessionOptions {
        SessionOptions {
            name: name.to_string(),
            cwd: std::env::temp_dir(),
            runtime_kind: RuntimeKind::Generic,
            role: "developer".to_string(),
            team_id: None,
            member_id: None,
            shell: "/bin/sh".to_string(),
            env: HashMap::new(),
            cols: 80,
            rows: 24,
            runtime_flags: vec![],
        }
    }

    #[test]
    fn rejects_invalid_session_name() {
        assert!(validate_session_name("ok-name_1").is_ok());
        assert!(validate_session_name("bad name!").is_err());
        assert!(validate_session_name("").is_err());
    }

    #[tokio::test]
    async fn create_session_reaches_ready_for_generic_shell() {
        let supervisor = test_supervisor();
        let opts = generic_opts("dev-1");
        supervisor.create_session(opts).await.expect("create session");
        let session = supervisor.registry.get("dev-1").expect("session exists");
        assert_eq!(session.status(), SessionStatus::Ready);
        supervisor.kill_session("dev-1").await.ok();
    }

    #[tokio::test]
    async fn create_session_rejects_duplicate_name() {
        let supervisor = test_supervisor();
        supervisor.create_session(generic_opts("dev-2")).await.unwrap();
        let err = supervisor.create_session(generic_opts("dev-2")).await;
        assert!(matches!(err, Err(CoreError::AlreadyExists(_))));
        supervisor.kill_session("dev-2").await.ok();
    }

    #[tokio::test]
    async fn orchestrator_exit_never_restarts() {
        let supervisor = test_supervisor();
        let mut opts = generic_opts("orchestrator");
        opts.member_id = Some("m1".to_string());
        supervisor.create_session(opts).await.unwrap();
        let decision = supervisor
            .on_exit_detected(ExitInfo {
                name: "orchestrator".to_string(),
                runtime_kind: RuntimeKind::Generic,
                role: "developer".to_string(),
                team_id: None,
                member_id: Some("m1".to_string()),
            })
            .await;
        assert_eq!(decision, ExitDecision::Inactive);
        assert!(supervisor.registry.get("orchestrator").is_none());
    }
}
