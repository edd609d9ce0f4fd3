//! Check-In Scheduler: durable one-shot and recurring timers that
//! deliver a text prompt to a named session at a wall-clock deadline. A
//! single timer task selects the nearest deadline; every mutation
//! rewrites the full state file atomically via
//! [`crate::persist::atomic_write`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::command::CommandHelper;
use crate::config::{state_dir, MissedFirePolicy, RuntimeConfig};
use crate::error::{CoreError, Result};
use crate::persist::atomic_write;

pub type CheckId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCheck {
    pub id: CheckId,
    pub target: String,
    pub fire_at: DateTime<Utc>,
    pub message: String,
    pub recurring: bool,
    pub interval_sec: Option<u64>,
    pub status: CheckStatus,
}

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SchedulerStateFile {
    version: u32,
    checks: Vec<ScheduledCheck>,
}

pub struct Scheduler {
    cfg: Arc<RuntimeConfig>,
    command: CommandHelper,
    checks: DashMap<CheckId, ScheduledCheck>,
    next_id: AtomicU64,
    wake: Notify,
    state_path: std::path::PathBuf,
}

impl Scheduler {
    pub fn new(cfg: Arc<RuntimeConfig>, command: CommandHelper, namespace: &str) -> Self {
        let state_path = state_dir(&cfg, namespace).join("scheduler.json");
        Self {
            cfg,
            command,
            checks: DashMap::new(),
            next_id: AtomicU64::new(1),
            wake: Notify::new(),
            state_path,
        }
    }

    /// Load persisted state if present. Drops `Fired` entries and
    /// re-arms `Pending` entries whose deadline already passed, per the
    /// configured missed-fire policy.
    pub fn initialize(&self) -> Result<()> {
        let data = match std::fs::read_to_string(&self.state_path) {
            Ok(d) => d,
            Err(_) => return Ok(()),
        };
        let parsed: SchedulerStateFile = match serde_json::from_str(&data) {
            Ok(p) => p,
            Err(e) => return Err(CoreError::StateCorrupt(e.to_string())),
        };
        if parsed.version != SCHEMA_VERSION {
            return Err(CoreError::StateCorrupt(format!(
                "scheduler state version {} != {}",
                parsed.version, SCHEMA_VERSION
            )));
        }

        let now = Utc::now();
        let min_lead = chrono::Duration::from_std(self.cfg.min_fire_lead).unwrap_or_default();
        let mut max_id = 0;
        for mut check in parsed.checks {
            max_id = max_id.max(check.id);
            if check.status != CheckStatus::Pending {
                self.checks.insert(check.id, check);
                continue;
            }
            if check.fire_at <= now {
                check.fire_at = match self.cfg.missed_fire_policy {
                    MissedFirePolicy::FireImmediately => now + min_lead,
                    MissedFirePolicy::SkipToNext => next_arm_after(&check, now, min_lead),
                };
            }
            self.checks.insert(check.id, check);
        }
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn schedule_once(&self, target: &str, minutes: i64, message: &str) -> Result<CheckId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let check = ScheduledCheck {
            id,
            target: target.to_string(),
            fire_at: Utc::now() + chrono::Duration::minutes(minutes),
            message: message.to_string(),
            recurring: false,
            interval_sec: None,
            status: CheckStatus::Pending,
        };
        self.checks.insert(id, check);
        self.persist()?;
        self.wake.notify_one();
        Ok(id)
    }

    pub fn schedule_recurring(
        &self,
        target: &str,
        interval_minutes: i64,
        message: &str,
    ) -> Result<CheckId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let interval_sec = (interval_minutes.max(1) * 60) as u64;
        let check = ScheduledCheck {
            id,
            target: target.to_string(),
            fire_at: Utc::now() + chrono::Duration::seconds(interval_sec as i64),
            message: message.to_string(),
            recurring: true,
            interval_sec: Some(interval_sec),
            status: CheckStatus::Pending,
        };
        self.checks.insert(id, check);
        self.persist()?;
        self.wake.notify_one();
        Ok(id)
    }

    /// Idempotent: a second `cancel` on the same id returns `false`.
    pub fn cancel(&self, id: CheckId) -> bool {
        let cancelled = match self.checks.get_mut(&id) {
            Some(mut entry) if entry.status == CheckStatus::Pending => {
                entry.status = CheckStatus::Cancelled;
                true
            }
            _ => false,
        };
        if cancelled {
            let _ = self.persist();
            self.wake.notify_one();
        }
        cancelled
    }

    pub fn list_all(&self) -> Vec<ScheduledCheck> {
        self.checks.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_for(&self, target: &str) -> Vec<ScheduledCheck> {
        self.checks
            .iter()
            .filter(|e| e.target == target)
            .map(|e| e.value().clone())
            .collect()
    }

    fn persist(&self) -> Result<()> {
        let checks: Vec<ScheduledCheck> = self.checks.iter().map(|e| e.value().clone()).collect();
        let state = SchedulerStateFile {
            version: SCHEMA_VERSION,
            checks,
        };
        let json = serde_json::to_vec_pretty(&state)
            .map_err(|e| CoreError::StateCorrupt(e.to_string()))?;
        atomic_write(&self.state_path, &json)
    }

    fn nearest_pending_deadline(&self) -> Option<DateTime<Utc>> {
        self.checks
            .iter()
            .filter(|e| e.status == CheckStatus::Pending)
            .map(|e| e.fire_at)
            .min()
    }

    /// Single timer task: sleeps until the nearest deadline or a
    /// mutation wakes it early.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.nearest_pending_deadline() {
                Some(when) => {
                    let sleep_for = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                None => self.wake.notified().await,
            }
            self.fire_due().await;
        }
    }

    async fn fire_due(&self) {
        let now = Utc::now();
        let due: Vec<CheckId> = self
            .checks
            .iter()
            .filter(|e| e.status == CheckStatus::Pending && e.fire_at <= now)
            .map(|e| e.id)
            .collect();

        for id in due {
            let Some((target, message, recurring, interval_sec)) = self.checks.get(&id).map(|e| {
                (
                    e.target.clone(),
                    e.message.clone(),
                    e.recurring,
                    e.interval_sec,
                )
            }) else {
                continue;
            };

            let delivered = self.command.send_message(&target, &message).await.is_ok();
            if !delivered {
                tracing::warn!(check_id = id, target = %target, "check-in delivery failed");
            }

            if let Some(mut entry) = self.checks.get_mut(&id) {
                if entry.status != CheckStatus::Pending {
                    continue;
                }
                if recurring {
                    let interval = interval_sec.unwrap_or(60);
                    entry.fire_at = now + chrono::Duration::seconds(interval as i64);
                } else {
                    entry.status = CheckStatus::Fired;
                }
            }
        }
        let _ = self.persist();
    }
}

fn next_arm_after(
    check: &ScheduledCheck,
    now: DateTime<Utc>,
    min_lead: chrono::Duration,
) -> DateTime<Utc> {
    if !check.recurring {
        return now + min_lead;
    }
    let interval = chrono::Duration::seconds(check.interval_sec.unwrap_or(60) as i64);
    let mut next = check.fire_at;
    while next <= now {
        next += interval;
    }
    next.max(now + min_lead)
}
