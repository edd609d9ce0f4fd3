//! Cross-component scenarios. Unlike the per-module `#[cfg(test)]`
//! blocks, these exercise multiple collaborators together the way a
//! real boot sequence wires them. Timing constants are scaled down from
//! production defaults so the suite runs in well under a second per
//! test.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentctl_core::activity::ActivityTracker;
use agentctl_core::checkpoint::{
    CheckpointStore, ConversationSnapshot, TaskSnapshot, TaskState,
};
use agentctl_core::command::CommandHelper;
use agentctl_core::config::RuntimeConfig;
use agentctl_core::events::{EventBus, SessionEvent, StatusReason};
use agentctl_core::memory::NoopMemorySink;
use agentctl_core::pty::{self, PtyProcess, SpawnOptions};
use agentctl_core::registry::{unix_now_secs, Registry, RuntimeKind, SessionMeta, SessionStatus};
use agentctl_core::scheduler::Scheduler;
use agentctl_core::supervisor::{SessionOptions, Supervisor};
use agentctl_core::task_registry::{NoTasksRegistry, TaskRegistry};
use async_trait::async_trait;
use chrono::Utc;

fn fast_cfg(home: PathBuf) -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    cfg.home = home;
    cfg.send_cr_delay = Duration::from_millis(80);
    cfg.startup_grace = Duration::from_millis(0);
    cfg.confirmation_delay = Duration::from_millis(30);
    cfg.process_poll_grace = Duration::from_millis(50);
    cfg.process_poll_interval = Duration::from_millis(30);
    cfg.ready_timeout = Duration::from_secs(3);
    cfg.active_ttl = Duration::from_secs(5);
    cfg.idle_ttl = Duration::from_secs(30);
    cfg.force_kill_escalation_delay = Duration::from_millis(50);
    cfg.min_fire_lead = Duration::from_millis(1);
    cfg
}

/// Writes an executable fake `claude` onto `PATH` that prints a ready
/// banner and, if `exit_after` is set, a matching exit banner shortly
/// after. Standing in for the real Claude Code binary, which is not
/// available in this environment.
fn install_fake_claude(bin_dir: &std::path::Path, exit_after: Option<&str>) {
    std::fs::create_dir_all(bin_dir).unwrap();
    let script_path = bin_dir.join("claude");
    let body = match exit_after {
        Some(banner) => format!(
            "#!/bin/sh\necho 'Welcome to Claude'\nsleep 0.05\necho '{banner}'\nsleep 2\n"
        ),
        None => "#!/bin/sh\necho 'Welcome to Claude'\nsleep 5\n".to_string(),
    };
    std::fs::write(&script_path, body).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();

    let existing = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{}:{existing}", bin_dir.display()));
}

fn claude_opts(name: &str, cwd: PathBuf, member_id: Option<&str>) -> SessionOptions {
    SessionOptions {
        name: name.to_string(),
        cwd,
        runtime_kind: RuntimeKind::ClaudeCode,
        role: "developer".to_string(),
        team_id: Some("team-a".to_string()),
        member_id: member_id.map(str::to_string),
        shell: "/bin/sh".to_string(),
        env: HashMap::new(),
        cols: 80,
        rows: 24,
        runtime_flags: vec![],
    }
}

fn generic_opts(name: &str, cwd: PathBuf) -> SessionOptions {
    SessionOptions {
        name: name.to_string(),
        cwd,
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

// Scenario 1: create dev-1, expect created -> ready within the timeout,
// a known banner in the rolling buffer's effect (readiness itself
// proves the pattern matched), and Active status immediately after.
#[tokio::test]
async fn scenario_1_create_session_reaches_ready_and_active() {
    let home = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    install_fake_claude(bin.path(), None);

    let cfg = Arc::new(fast_cfg(home.path().to_path_buf()));
    let registry = Registry::new();
    let events = EventBus::new();
    let activity = Arc::new(ActivityTracker::new(Arc::clone(&cfg)));
    let supervisor = Supervisor::new(
        Arc::clone(&cfg),
        registry.clone(),
        events.clone(),
        Arc::clone(&activity),
        Arc::new(NoTasksRegistry),
        Arc::new(NoopMemorySink),
        "scenario1",
    );

    let mut rx = events.subscribe();
    let project = tempfile::tempdir().unwrap();
    supervisor
        .create_session(claude_opts("dev-1", project.path().to_path_buf(), None))
        .await
        .expect("session reaches ready");

    let mut saw_created = false;
    let mut saw_ready = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        match event {
            SessionEvent::Created { name, .. } if name == "dev-1" => saw_created = true,
            SessionEvent::Ready { name } if name == "dev-1" => {
                saw_ready = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_created && saw_ready);

    let session = registry.get("dev-1").expect("session registered");
    assert_eq!(session.status(), SessionStatus::Ready);
    assert_eq!(activity.status("dev-1"), SessionStatus::Active);

    supervisor.kill_session("dev-1").await.ok();
}

// Scenario 2: sendMessage writes text, then (>= SEND_CR_DELAY later) a
// lone CR, never coalesced into the same write.
#[tokio::test]
async fn scenario_2_send_message_delivers_text_then_delayed_cr() {
    let registry = Registry::new();
    let opts = SpawnOptions {
        cwd: std::env::temp_dir(),
        shell: "/bin/sh".into(),
        argv: vec!["/bin/cat".into()],
        env: HashMap::new(),
        cols: 80,
        rows: 24,
    };
    let pty = Arc::new(PtyProcess::spawn(&opts, 8, 8).unwrap());
    let meta = SessionMeta {
        name: "dev-1".to_string(),
        cwd: "/tmp".to_string(),
        pid: pty.pid(),
        runtime_kind: RuntimeKind::Generic,
        role: "developer".to_string(),
        team_id: None,
        member_id: None,
        resumable_session_id: None,
        created_at: unix_now_secs(),
        status: SessionStatus::Ready,
    };
    registry.create(meta, Arc::clone(&pty)).unwrap();

    let chunks: Arc<Mutex<Vec<(std::time::Instant, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    pty.on_data(Box::new(move |bytes| {
        sink.lock().unwrap().push((std::time::Instant::now(), bytes.to_vec()));
    }))
    .unwrap();

    let send_cr_delay = Duration::from_millis(100);
    let helper = CommandHelper::new(registry.clone(), send_cr_delay);
    let sent_at = std::time::Instant::now();
    helper.send_message("dev-1", "hello").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // `cat` copies stdin to stdout verbatim, so "hello" and the lone CR
    // each show up in the echoed stream regardless of whether the pty's
    // own line discipline also echoes the input (that would only
    // duplicate bytes, never reorder them).
    let recorded = chunks.lock().unwrap().clone();
    let mut seen = Vec::new();
    for (at, bytes) in &recorded {
        seen.extend(bytes.iter().map(|b| (*at, *b)));
    }
    let hello_end = {
        let joined: Vec<u8> = seen.iter().map(|(_, b)| *b).collect();
        let pos = joined
            .windows(b"hello".len())
            .position(|w| w == b"hello")
            .expect("text arrived");
        seen[pos + b"hello".len() - 1].0
    };
    let cr_at = seen
        .iter()
        .find(|(at, b)| *b == b'\r' && *at >= hello_end)
        .map(|(at, _)| *at)
        .expect("CR arrived after text");

    assert!(cr_at >= hello_end);
    assert!(cr_at.duration_since(sent_at) >= send_cr_delay);

    registry.kill("dev-1").ok();
}

// Scenario 3: scheduleOnce fires once, delivering the message; a
// restart mid-wait re-arms the check and it still fires exactly once.
#[tokio::test]
async fn scenario_3_scheduled_check_fires_and_survives_restart() {
    let home = tempfile::tempdir().unwrap();
    let registry = Registry::new();
    let opts = SpawnOptions {
        cwd: std::env::temp_dir(),
        shell: "/bin/sh".into(),
        argv: vec!["/bin/cat".into()],
        env: HashMap::new(),
        cols: 80,
        rows: 24,
    };
    let pty = Arc::new(PtyProcess::spawn(&opts, 8, 8).unwrap());
    let meta = SessionMeta {
        name: "dev-1".to_string(),
        cwd: "/tmp".to_string(),
        pid: pty.pid(),
        runtime_kind: RuntimeKind::Generic,
        role: "developer".to_string(),
        team_id: None,
        member_id: None,
        resumable_session_id: None,
        created_at: unix_now_secs(),
        status: SessionStatus::Ready,
    };
    registry.create(meta, Arc::clone(&pty)).unwrap();

    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    pty.on_data(Box::new(move |bytes| sink.lock().unwrap().extend_from_slice(bytes)))
        .unwrap();

    let cfg = Arc::new(fast_cfg(home.path().to_path_buf()));
    let command = CommandHelper::new(registry.clone(), cfg.send_cr_delay);
    let id = {
        let scheduler = Scheduler::new(Arc::clone(&cfg), command.clone(), "scenario3");
        scheduler.schedule_once("dev-1", 0, "ping").unwrap()
    };

    // "Restart": a fresh Scheduler over the same namespace re-arms from
    // the persisted state file rather than from in-memory state.
    let restarted = Arc::new(Scheduler::new(Arc::clone(&cfg), command, "scenario3"));
    restarted.initialize().unwrap();
    let runner = tokio::spawn(Arc::clone(&restarted).run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    runner.abort();

    let text = String::from_utf8(received.lock().unwrap().clone()).unwrap();
    assert!(text.contains("ping"));
    let check = restarted.list_all().into_iter().find(|c| c.id == id).unwrap();
    assert_eq!(check.status, agentctl_core::scheduler::CheckStatus::Fired);

    registry.kill("dev-1").ok();
}

// Scenario 4: the child dies out from under an Active session; after
// process_poll_grace + process_poll_interval, exactly one
// Inactive(runtime_exited) status is published.
#[tokio::test]
async fn scenario_4_dead_child_emits_inactive_exactly_once() {
    let home = tempfile::tempdir().unwrap();
    let cfg = Arc::new(fast_cfg(home.path().to_path_buf()));
    let registry = Registry::new();
    let events = EventBus::new();
    let activity = Arc::new(ActivityTracker::new(Arc::clone(&cfg)));
    let supervisor = Supervisor::new(
        Arc::clone(&cfg),
        registry.clone(),
        events.clone(),
        Arc::clone(&activity),
        Arc::new(NoTasksRegistry),
        Arc::new(NoopMemorySink),
        "scenario4",
    );

    let project = tempfile::tempdir().unwrap();
    supervisor
        .create_session(generic_opts("dev-4", project.path().to_path_buf()))
        .await
        .expect("generic shell reaches ready");

    let mut rx = events.subscribe();
    let pid = registry.get("dev-4").unwrap().pty.pid();
    #[cfg(unix)]
    pty::signal_process(pid, nix::sys::signal::Signal::SIGKILL).unwrap();

    let mut inactive_count = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Ok(SessionEvent::Status {
                name,
                status: SessionStatus::Inactive,
                reason: StatusReason::RuntimeExited,
                ..
            })) if name == "dev-4" => inactive_count += 1,
            _ => {}
        }
    }
    assert_eq!(inactive_count, 1);
}

struct AlwaysRestart;

#[async_trait]
impl TaskRegistry for AlwaysRestart {
    async fn has_restart_worthy_task(&self, _member_id: &str) -> bool {
        true
    }
}

// Scenario 5: runtime reports "Agent powering down" for a session with
// an Active task; the Supervisor restarts it under the same name and
// never emits Inactive for the old instance.
#[tokio::test]
async fn scenario_5_restart_supersedes_inactive() {
    let home = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    install_fake_claude(bin.path(), Some("Agent powering down"));

    let cfg = Arc::new(fast_cfg(home.path().to_path_buf()));
    let registry = Registry::new();
    let events = EventBus::new();
    let activity = Arc::new(ActivityTracker::new(Arc::clone(&cfg)));
    let supervisor = Supervisor::new(
        Arc::clone(&cfg),
        registry.clone(),
        events.clone(),
        Arc::clone(&activity),
        Arc::new(AlwaysRestart),
        Arc::new(NoopMemorySink),
        "scenario5",
    );

    let project = tempfile::tempdir().unwrap();
    let mut rx = events.subscribe();
    supervisor
        .create_session(claude_opts("dev-5", project.path().to_path_buf(), Some("m1")))
        .await
        .expect("first boot reaches ready");

    let mut ready_count = 0;
    let mut inactive_count = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(800);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Ok(SessionEvent::Ready { name })) if name == "dev-5" => ready_count += 1,
            Ok(Ok(SessionEvent::Status {
                name,
                status: SessionStatus::Inactive,
                ..
            })) if name == "dev-5" => inactive_count += 1,
            _ => {}
        }
    }

    assert_eq!(inactive_count, 0, "restart must supersede Inactive");
    assert!(ready_count >= 2, "expected a second Ready after restart, saw {ready_count}");

    supervisor.kill_session("dev-5").await.ok();
}

// Scenario 6: checkpoint + resume-instructions round trip across a
// simulated restart.
#[tokio::test]
async fn scenario_6_checkpoint_resume_instructions() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Arc::new(fast_cfg(dir.path().to_path_buf()));

    let previous = {
        let store = CheckpointStore::new(Arc::clone(&cfg), "orchestrator");
        store.initialize().unwrap();
        store.update_conversation(ConversationSnapshot {
            id: "c1".to_string(),
            source: "chat".to_string(),
            recent_messages: vec!["one".into(), "two".into(), "three".into()],
            last_activity_at: Utc::now(),
        });
        store.update_task(TaskSnapshot {
            id: "t1".to_string(),
            title: "ship it".to_string(),
            status: TaskState::InProgress,
            progress_pct: 50,
        });
        store.save("before_restart").unwrap();
        store.snapshot()
    };

    let restarted = CheckpointStore::new(Arc::clone(&cfg), "orchestrator");
    let loaded = restarted.initialize().unwrap().expect("prior checkpoint present");
    assert_eq!(loaded.tasks.len(), previous.tasks.len());

    let resume = restarted.generate_resume_instructions(&loaded);
    assert_eq!(resume.tasks_to_resume.len(), 1);
    assert_eq!(resume.tasks_to_resume[0].id, "t1");
    assert!(resume.conversations_to_resume.iter().any(|c| c.id == "c1"));
}
