//! Output Monitor: per-session rolling buffer + pattern matcher +
//! process-liveness poller, confirming runtime exit with a startup
//! grace window, a debounce, and a single confirmation latch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::config::RuntimeConfig;
use crate::events::{session_role_for, EventBus, SessionEvent, StatusReason};
use crate::exit_handler::{ExitDecision, ExitHandler, ExitInfo};
use crate::memory::MemorySink;
use crate::pty::{ListenerId, PtyProcess};
use crate::registry::{Registry, RuntimeKind, SessionStatus};
use crate::resolver::LateBound;

struct MonitorEntry {
    data_listener: ListenerId,
    confirmed: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

pub struct OutputMonitor {
    cfg: Arc<RuntimeConfig>,
    registry: Registry,
    events: EventBus,
    exit_handler: Arc<LateBound<dyn ExitHandler>>,
    memory: Arc<dyn MemorySink>,
    entries: Mutex<HashMap<String, MonitorEntry>>,
}

struct SessionSpec {
    name: String,
    runtime_kind: RuntimeKind,
    role: String,
    team_id: Option<String>,
    member_id: Option<String>,
    exit_patterns: Vec<Regex>,
}

impl OutputMonitor {
    pub fn new(
        cfg: Arc<RuntimeConfig>,
        registry: Registry,
        events: EventBus,
        exit_handler: Arc<LateBound<dyn ExitHandler>>,
        memory: Arc<dyn MemorySink>,
    ) -> Self {
        Self {
            cfg,
            registry,
            events,
            exit_handler,
            memory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start monitoring `name`. Idempotent: a second call cancels the
    /// first subscription before installing a fresh one.
    pub fn start_monitoring(
        &self,
        name: &str,
        runtime_kind: RuntimeKind,
        role: String,
        team_id: Option<String>,
        member_id: Option<String>,
        exit_patterns: Vec<String>,
    ) {
        self.stop_monitoring(name);

        let session = match self.registry.get(name) {
            Some(s) => s,
            None => return,
        };

        let spec = Arc::new(SessionSpec {
            name: name.to_string(),
            runtime_kind,
            role,
            team_id,
            member_id,
            exit_patterns: exit_patterns
                .iter()
                .map(|p| Regex::new(p).unwrap_or_else(|_| Regex::new(&regex::escape(p)).expect("escaped literal is valid regex")))
                .collect(),
        });

        let buffer: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let confirmed = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        let started_at = Instant::now();
        let max_buffer_size = self.cfg.max_buffer_size;

        let this_buffer = Arc::clone(&buffer);
        let this_confirmed = Arc::clone(&confirmed);
        let this_cancel = Arc::clone(&cancel);
        let this_spec = Arc::clone(&spec);
        let this_cfg = Arc::clone(&self.cfg);
        let self_for_confirm = SelfHandles {
            registry: self.registry.clone(),
            events: self.events.clone(),
            exit_handler: Arc::clone(&self.exit_handler),
            memory: Arc::clone(&self.memory),
            orchestrator_session: self.cfg.orchestrator_session.clone(),
        };

        let data_listener = session
            .pty
            .on_data(Box::new(move |bytes: &[u8]| {
                let mut guard = this_buffer.lock().expect("buffer mutex");
                guard.push_str(&String::from_utf8_lossy(bytes));
                if guard.len() > max_buffer_size {
                    let excess = guard.len() - max_buffer_size;
                    let trim_at = guard
                        .char_indices()
                        .map(|(i, _)| i)
                        .find(|i| *i >= excess)
                        .unwrap_or(guard.len());
                    guard.drain(..trim_at);
                }
                drop(guard);

                if this_confirmed.load(Ordering::SeqCst) || this_cancel.load(Ordering::SeqCst) {
                    return;
                }
                if started_at.elapsed() < this_cfg.startup_grace {
                    return;
                }
                let matched = {
                    let g = this_buffer.lock().expect("buffer mutex");
                    this_spec.exit_patterns.iter().any(|re| re.is_match(&g))
                };
                if !matched {
                    return;
                }

                let buffer = Arc::clone(&this_buffer);
                let confirmed = Arc::clone(&this_confirmed);
                let cancel = Arc::clone(&this_cancel);
                let spec = Arc::clone(&this_spec);
                let cfg = Arc::clone(&this_cfg);
                let handles = self_for_confirm.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(cfg.confirmation_delay).await;
                    if cancel.load(Ordering::SeqCst) || confirmed.load(Ordering::SeqCst) {
                        return;
                    }
                    let still_matches = {
                        let g = buffer.lock().expect("buffer mutex");
                        spec.exit_patterns.iter().any(|re| re.is_match(&g))
                    };
                    if !still_matches {
                        return;
                    }
                    if confirmed.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    let tail = {
                        let g = buffer.lock().expect("buffer mutex");
                        g.clone()
                    };
                    handles.confirm_exit(&spec, tail).await;
                });
            }))
            .ok();

        if let Some(data_listener) = data_listener {
            self.entries.lock().expect("entries mutex").insert(
                name.to_string(),
                MonitorEntry {
                    data_listener,
                    confirmed: Arc::clone(&confirmed),
                    cancel: Arc::clone(&cancel),
                },
            );
        }

        self.spawn_liveness_poll(Arc::clone(&spec), confirmed, cancel, Arc::clone(&self.cfg));
    }

    fn spawn_liveness_poll(
        &self,
        spec: Arc<SessionSpec>,
        confirmed: Arc<AtomicBool>,
        cancel: Arc<AtomicBool>,
        cfg: Arc<RuntimeConfig>,
    ) {
        let registry = self.registry.clone();
        let events = self.events.clone();
        let exit_handler = Arc::clone(&self.exit_handler);
        let memory = Arc::clone(&self.memory);
        let orchestrator_session = self.cfg.orchestrator_session.clone();
        let name = spec.name.clone();

        tokio::spawn(async move {
            tokio::time::sleep(cfg.process_poll_grace).await;
            loop {
                if cancel.load(Ordering::SeqCst) || confirmed.load(Ordering::SeqCst) {
                    return;
                }
                let alive = match registry.get(&name) {
                    Some(session) => session.pty.is_alive(),
                    None => return,
                };
                if !alive {
                    if confirmed.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    let handles = SelfHandles {
                        registry: registry.clone(),
                        events: events.clone(),
                        exit_handler: Arc::clone(&exit_handler),
                        memory: Arc::clone(&memory),
                        orchestrator_session: orchestrator_session.clone(),
                    };
                    handles.confirm_exit(&spec, String::new()).await;
                    return;
                }
                tokio::time::sleep(cfg.process_poll_interval).await;
            }
        });
    }

    /// Idempotent: a session not being monitored is a no-op.
    pub fn stop_monitoring(&self, name: &str) {
        let mut guard = self.entries.lock().expect("entries mutex");
        if let Some(entry) = guard.remove(name) {
            entry.cancel.store(true, Ordering::SeqCst);
            if let Some(session) = self.registry.get(name) {
                session.pty.unsubscribe_data(entry.data_listener);
            }
        }
    }
}

#[derive(Clone)]
struct SelfHandles {
    registry: Registry,
    events: EventBus,
    exit_handler: Arc<LateBound<dyn ExitHandler>>,
    memory: Arc<dyn MemorySink>,
    orchestrator_session: String,
}

impl SelfHandles {
    async fn confirm_exit(&self, spec: &SessionSpec, tail: String) {
        let info = ExitInfo {
            name: spec.name.clone(),
            runtime_kind: spec.runtime_kind,
            role: spec.role.clone(),
            team_id: spec.team_id.clone(),
            member_id: spec.member_id.clone(),
        };

        let decision = match self.exit_handler.get() {
            Some(handler) => handler.on_exit_detected(info).await,
            None => ExitDecision::Inactive,
        };

        if matches!(decision, ExitDecision::Inactive) {
            if let Some(session) = self.registry.get(&spec.name) {
                session.set_status(SessionStatus::Inactive);
            }
            let session_role = session_role_for(&spec.name, &self.orchestrator_session);
            self.events.publish(SessionEvent::Status {
                name: spec.name.clone(),
                status: SessionStatus::Inactive,
                reason: StatusReason::RuntimeExited,
                session_role,
                error: None,
            });
        }

        self.memory.snapshot(&spec.name, &spec.role, tail).await;
    }
}
