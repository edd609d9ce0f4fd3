//! Global config singleton. Loaded once from `<home>/settings.toml`;
//! all timing constants and thresholds are policy, not hard-coded
//! literals, so the core boundary never guesses them.
//!
//! First caller of [`ensure_loaded`] does the work; later callers get
//! the same instance.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Reserved name for the orchestrator session. Never auto-restarted.
pub const DEFAULT_ORCHESTRATOR_SESSION: &str = "orchestrator";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Root directory for durable state: `<home>/state/<namespace>/...`.
    pub home: PathBuf,
    /// Overrides the `state` subtree independent of `home`, so
    /// `state_dir()` yields `<dir>/<namespace>` instead of
    /// `<home>/state/<namespace>`.
    pub state_dir_override: Option<PathBuf>,
    /// Reserved orchestrator session name.
    pub orchestrator_session: String,

    // -- Command Helper --
    pub send_cr_delay: Duration,

    // -- Output Monitor --
    pub max_buffer_size: usize,
    pub startup_grace: Duration,
    pub confirmation_delay: Duration,
    pub process_poll_interval: Duration,
    pub process_poll_grace: Duration,
    pub ready_timeout: Duration,

    // -- Activity Tracker --
    pub active_ttl: Duration,
    pub idle_ttl: Duration,

    // -- Session Supervisor --
    pub force_kill_escalation_delay: Duration,

    // -- Scheduler --
    pub min_fire_lead: Duration,

    // -- State Checkpoint Store --
    pub backup_retention: usize,
    pub checkpoint_interval: Duration,
    pub resume_conv_window: Duration,
    pub max_recent_messages: usize,

    // -- Resource Watchdog --
    pub watchdog_poll_interval: Duration,
    pub alert_cooldown: Duration,
    pub disk_warn_pct: f32,
    pub disk_crit_pct: f32,
    pub mem_warn_pct: f32,
    pub mem_crit_pct: f32,
    pub cpu_warn_pct: f32,
    pub cpu_crit_pct: f32,

    // -- PTY Backend --
    pub max_cols: u16,
    pub max_rows: u16,
    pub max_data_listeners: usize,
    pub max_exit_listeners: usize,

    /// Missed-fire policy for recurring checks whose deadline passed
    /// while the process was down. Defaults to `SkipToNext`;
    /// `FireImmediately` is exposed for product choice.
    pub missed_fire_policy: MissedFirePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedFirePolicy {
    FireImmediately,
    SkipToNext,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            state_dir_override: None,
            orchestrator_session: DEFAULT_ORCHESTRATOR_SESSION.to_string(),
            send_cr_delay: Duration::from_millis(100),
            max_buffer_size: 16 * 1024,
            startup_grace: Duration::from_secs(60),
            confirmation_delay: Duration::from_millis(750),
            process_poll_interval: Duration::from_secs(5),
            process_poll_grace: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(45),
            active_ttl: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(300),
            force_kill_escalation_delay: Duration::from_secs(5),
            min_fire_lead: Duration::from_secs(5),
            backup_retention: 10,
            checkpoint_interval: Duration::from_secs(300),
            resume_conv_window: Duration::from_secs(3600),
            max_recent_messages: 200,
            watchdog_poll_interval: Duration::from_secs(60),
            alert_cooldown: Duration::from_secs(15 * 60),
            disk_warn_pct: 85.0,
            disk_crit_pct: 95.0,
            mem_warn_pct: 85.0,
            mem_crit_pct: 95.0,
            cpu_warn_pct: 200.0,
            cpu_crit_pct: 400.0,
            max_cols: 500,
            max_rows: 200,
            max_data_listeners: 64,
            max_exit_listeners: 16,
            missed_fire_policy: MissedFirePolicy::SkipToNext,
        }
    }
}

fn default_home() -> PathBuf {
    if let Ok(dir) = std::env::var("AGENTCTL_HOME") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".agentctl")
}

/// Ensure config is loaded (idempotent). Reads `<home>/settings.toml` if
/// present, falling back to defaults on any read/parse error; env var
/// overrides are layered on top either way.
pub fn ensure_loaded() -> &'static RuntimeConfig {
    CONFIG.get_or_init(build_config)
}

fn build_config() -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();

    let settings_path = cfg.home.join("settings.toml");
    if let Ok(data) = std::fs::read_to_string(&settings_path) {
        if let Ok(parsed) = toml::from_str::<SettingsFile>(&data) {
            apply_settings_file(&mut cfg, parsed);
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

#[derive(Debug, Default, serde::Deserialize)]
struct SettingsFile {
    state_dir: Option<PathBuf>,
    orchestrator_session: Option<String>,
    poll_interval_secs: Option<u64>,
    alert_disk_warn_pct: Option<f32>,
    alert_disk_crit_pct: Option<f32>,
    alert_mem_warn_pct: Option<f32>,
    alert_mem_crit_pct: Option<f32>,
    alert_cpu_warn_pct: Option<f32>,
    alert_cpu_crit_pct: Option<f32>,
    missed_fire_policy: Option<MissedFirePolicy>,
}

fn apply_settings_file(cfg: &mut RuntimeConfig, file: SettingsFile) {
    if let Some(dir) = file.state_dir {
        cfg.home = dir;
    }
    if let Some(name) = file.orchestrator_session {
        cfg.orchestrator_session = name;
    }
    if let Some(secs) = file.poll_interval_secs {
        cfg.watchdog_poll_interval = Duration::from_secs(secs);
    }
    if let Some(v) = file.alert_disk_warn_pct {
        cfg.disk_warn_pct = v;
    }
    if let Some(v) = file.alert_disk_crit_pct {
        cfg.disk_crit_pct = v;
    }
    if let Some(v) = file.alert_mem_warn_pct {
        cfg.mem_warn_pct = v;
    }
    if let Some(v) = file.alert_mem_crit_pct {
        cfg.mem_crit_pct = v;
    }
    if let Some(v) = file.alert_cpu_warn_pct {
        cfg.cpu_warn_pct = v;
    }
    if let Some(v) = file.alert_cpu_crit_pct {
        cfg.cpu_crit_pct = v;
    }
    if let Some(policy) = file.missed_fire_policy {
        cfg.missed_fire_policy = policy;
    }
}

fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(dir) = std::env::var("AGENTCTL_STATE_DIR") {
        cfg.state_dir_override = Some(PathBuf::from(dir));
    }
    if let Ok(name) = std::env::var("AGENTCTL_ORCHESTRATOR_SESSION") {
        if !name.is_empty() {
            cfg.orchestrator_session = name;
        }
    }
    if let Ok(secs) = std::env::var("AGENTCTL_POLL_INTERVAL_SECS") {
        if let Ok(v) = secs.parse::<u64>() {
            cfg.watchdog_poll_interval = Duration::from_secs(v);
        }
    }
    if let Ok(v) = std::env::var("AGENTCTL_ALERT_DISK_WARN") {
        if let Ok(v) = v.parse() {
            cfg.disk_warn_pct = v;
        }
    }
    if let Ok(v) = std::env::var("AGENTCTL_ALERT_DISK_CRIT") {
        if let Ok(v) = v.parse() {
            cfg.disk_crit_pct = v;
        }
    }
}

/// State directory for a given namespace: `<home>/state/<namespace>`,
/// or `<state_dir_override>/<namespace>` when set.
pub fn state_dir(cfg: &RuntimeConfig, namespace: &str) -> PathBuf {
    match &cfg.state_dir_override {
        Some(dir) => dir.join(namespace),
        None => cfg.home.join("state").join(namespace),
    }
}
