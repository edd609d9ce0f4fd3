//! `agentctl`: foreground supervisor process plus local inspection
//! subcommands for the Agent Session Runtime. `serve` owns the live
//! Registry/Scheduler/Watchdog/CheckpointStore; every other subcommand
//! is a short-lived process that reads the same on-disk state those
//! components persist rather than talking to a running `serve` over a
//! socket — there is no RPC gateway here.

mod exit_error;
mod team_config;

use std::path::PathBuf;
use std::sync::Arc;

use agentctl_core::checkpoint::CheckpointStore;
use agentctl_core::command::CommandHelper;
use agentctl_core::config::{self, RuntimeConfig};
use agentctl_core::events::EventBus;
use agentctl_core::memory::NoopMemorySink;
use agentctl_core::pty;
use agentctl_core::registry::Registry;
use agentctl_core::scheduler::Scheduler;
use agentctl_core::supervisor::Supervisor;
use agentctl_core::task_registry::NoTasksRegistry;
use agentctl_core::{activity::ActivityTracker, checkpoint, watchdog::Watchdog};
use clap::{Parser, Subcommand};

use exit_error::ExitError;

#[derive(Parser)]
#[command(name = "agentctl", about = "Agent Session Runtime supervisor CLI", version)]
struct Cli {
    /// Overrides AGENTCTL_HOME for this invocation.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// State namespace (scopes scheduler/checkpoint/session-index files).
    #[arg(long, global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor, scheduler, and watchdog in the foreground.
    Serve {
        /// TOML file describing sessions to create at startup.
        #[arg(long)]
        sessions: Option<PathBuf>,
    },
    /// Inspect or terminate sessions.
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },
    /// Inspect or cancel scheduled check-ins.
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },
    /// Inspect or restore checkpoint backups.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// List sessions from the last persisted index.
    Ls,
    /// Send SIGTERM then SIGKILL to a session's process group by name.
    Kill { name: String },
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// List all scheduled check-ins, including fired and cancelled ones.
    Ls,
    /// Cancel a pending check-in by id.
    Cancel { id: u64 },
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// List available numbered backups, newest first.
    ListBackups,
    /// Restore state from a given backup id (e.g. "1").
    Restore { id: String },
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    if let Some(home) = &cli.home {
        std::env::set_var("AGENTCTL_HOME", home);
    }
    let cfg = config::ensure_loaded();

    let result = match cli.command {
        Command::Serve { sessions } => run_serve(cfg, &cli.namespace, sessions),
        Command::Session { action } => run_session(cfg, &cli.namespace, action),
        Command::Schedule { action } => run_schedule(cfg, &cli.namespace, action),
        Command::Checkpoint { action } => run_checkpoint(cfg, &cli.namespace, action),
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("agentctl: {e}");
            std::process::exit(e.code);
        }
    }
}

fn run_serve(
    cfg: &'static RuntimeConfig,
    namespace: &str,
    sessions_file: Option<PathBuf>,
) -> Result<(), ExitError> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| ExitError::backend(e.to_string()))?;
    rt.block_on(serve(cfg, namespace, sessions_file))
}

async fn serve(
    cfg: &'static RuntimeConfig,
    namespace: &str,
    sessions_file: Option<PathBuf>,
) -> Result<(), ExitError> {
    let cfg_arc = Arc::new(cfg.clone());
    let registry = Registry::new();
    let events = EventBus::new();
    let activity = Arc::new(ActivityTracker::new(Arc::clone(&cfg_arc)));
    let supervisor = Supervisor::new(
        Arc::clone(&cfg_arc),
        registry.clone(),
        events.clone(),
        Arc::clone(&activity),
        Arc::new(NoTasksRegistry),
        Arc::new(NoopMemorySink),
        namespace,
    );

    let command = CommandHelper::new(registry.clone(), cfg_arc.send_cr_delay);
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&cfg_arc), command, namespace));
    scheduler
        .initialize()
        .map_err(|e| ExitError::config(format!("scheduler state corrupt: {e}")))?;

    let watchdog = Arc::new(Watchdog::new(Arc::clone(&cfg_arc), events.clone(), cfg_arc.home.clone()));

    let store = Arc::new(CheckpointStore::new(Arc::clone(&cfg_arc), namespace));
    let previous = store
        .initialize()
        .map_err(|e| ExitError::config(format!("checkpoint state corrupt: {e}")))?;
    if let Some(prev) = previous {
        let resume = store.generate_resume_instructions(&prev);
        tracing::info!(
            conversations = resume.conversations_to_resume.len(),
            tasks = resume.tasks_to_resume.len(),
            "resuming from prior checkpoint"
        );
    }

    if let Some(path) = sessions_file {
        let defs = team_config::load(&path).map_err(ExitError::config)?;
        for opts in defs {
            let name = opts.name.clone();
            if let Err(e) = supervisor.create_session(opts).await {
                tracing::error!(session = %name, error = %e, "failed to start configured session");
            }
        }
    }

    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());
    let watchdog_task = tokio::spawn(Arc::clone(&watchdog).run());
    let checkpoint_task = tokio::spawn(checkpoint::run_periodic_checkpoint(
        Arc::clone(&store),
        cfg_arc.checkpoint_interval,
    ));

    tracing::info!(namespace, "agentctl serving; press ctrl-c to stop");
    let interrupted = tokio::signal::ctrl_c().await.is_ok();

    scheduler_task.abort();
    watchdog_task.abort();
    checkpoint_task.abort();

    store
        .prepare_for_shutdown()
        .map_err(|e| ExitError::backend(format!("failed to persist checkpoint on shutdown: {e}")))?;

    for meta in registry.list() {
        let _ = supervisor.kill_session(&meta.name).await;
    }

    if interrupted {
        std::process::exit(130);
    }
    Ok(())
}

fn run_session(cfg: &RuntimeConfig, namespace: &str, action: SessionCommand) -> Result<(), ExitError> {
    match action {
        SessionCommand::Ls => {
            for meta in Supervisor::read_index(cfg, namespace) {
                println!(
                    "{:<20} {:<10?} {:<10?} pid={}",
                    meta.name, meta.runtime_kind, meta.status, meta.pid
                );
            }
        }
        SessionCommand::Kill { name } => {
            let meta = Supervisor::read_index(cfg, namespace)
                .into_iter()
                .find(|m| m.name == name)
                .ok_or_else(|| ExitError::config(format!("no known session named {name}")))?;
            pty::signal_process(meta.pid, sigterm())?;
            std::thread::sleep(cfg.force_kill_escalation_delay);
            let _ = pty::signal_process(meta.pid, sigkill());
            let _ = pty::kill_process_group(meta.pid, sigkill());
            println!("sent kill sequence to {name} (pid {})", meta.pid);
        }
    }
    Ok(())
}

fn run_schedule(cfg: &RuntimeConfig, namespace: &str, action: ScheduleCommand) -> Result<(), ExitError> {
    let command = CommandHelper::new(Registry::new(), cfg.send_cr_delay);
    let scheduler = Scheduler::new(Arc::new(cfg.clone()), command, namespace);
    scheduler
        .initialize()
        .map_err(|e| ExitError::config(format!("scheduler state corrupt: {e}")))?;

    match action {
        ScheduleCommand::Ls => {
            for check in scheduler.list_all() {
                println!(
                    "#{:<4} {:<20} {:?} fires_at={} recurring={}",
                    check.id, check.target, check.status, check.fire_at, check.recurring
                );
            }
        }
        ScheduleCommand::Cancel { id } => {
            if scheduler.cancel(id) {
                println!("cancelled #{id}");
            } else {
                return Err(ExitError::config(format!("#{id} is not pending")));
            }
        }
    }
    Ok(())
}

fn run_checkpoint(
    cfg: &RuntimeConfig,
    namespace: &str,
    action: CheckpointCommand,
) -> Result<(), ExitError> {
    let store = CheckpointStore::new(Arc::new(cfg.clone()), namespace);
    match action {
        CheckpointCommand::ListBackups => {
            for id in store.list_backups() {
                println!("{id}");
            }
        }
        CheckpointCommand::Restore { id } => {
            let restored = store
                .restore_from_backup(&id)
                .map_err(|e| ExitError::backend(format!("restore failed: {e}")))?;
            if restored {
                store
                    .save("restored")
                    .map_err(|e| ExitError::backend(format!("failed to persist restored state: {e}")))?;
                println!("restored from backup {id}");
            } else {
                return Err(ExitError::config(format!("no such backup: {id}")));
            }
        }
    }
    Ok(())
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
