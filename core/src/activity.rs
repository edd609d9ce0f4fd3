//! Activity & Heartbeat Tracker: three independent timestamp sources
//! feed one derived status per session. Recording is O(1); status
//! derivation is a pure function of elapsed time so no background timer
//! is needed to "expire" anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::config::RuntimeConfig;
use crate::registry::SessionStatus;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
struct ActivityRecord {
    pty_activity_at: AtomicU64,
    api_activity_at: AtomicU64,
    heartbeat_at: AtomicU64,
}

impl ActivityRecord {
    fn last_seen(&self) -> u64 {
        self.pty_activity_at
            .load(Ordering::Relaxed)
            .max(self.api_activity_at.load(Ordering::Relaxed))
            .max(self.heartbeat_at.load(Ordering::Relaxed))
    }
}

/// Derives `Active`/`Idle`/`Inactive` for every session from whichever
/// of the three sources was most recently touched.
pub struct ActivityTracker {
    records: DashMap<String, Arc<ActivityRecord>>,
    cfg: Arc<RuntimeConfig>,
}

impl ActivityTracker {
    pub fn new(cfg: Arc<RuntimeConfig>) -> Self {
        Self {
            records: DashMap::new(),
            cfg,
        }
    }

    fn record_for(&self, name: &str) -> Arc<ActivityRecord> {
        Arc::clone(
            self.records
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(ActivityRecord::default()))
                .value(),
        )
    }

    pub fn record_pty_activity(&self, name: &str) {
        self.record_for(name)
            .pty_activity_at
            .store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_api_activity(&self, name: &str) {
        self.record_for(name)
            .api_activity_at
            .store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self, name: &str) {
        self.record_for(name)
            .heartbeat_at
            .store(now_millis(), Ordering::Relaxed);
    }

    /// Status derived purely from elapsed time since the last of any
    /// of the three sources. A session with no recorded activity at
    /// all is `Inactive` — callers are expected to have already set a
    /// freshly-created session's status from the supervisor instead.
    pub fn status(&self, name: &str) -> SessionStatus {
        let Some(record) = self.records.get(name) else {
            return SessionStatus::Inactive;
        };
        let elapsed = Duration::from_millis(now_millis().saturating_sub(record.last_seen()));
        if elapsed <= self.cfg.active_ttl {
            SessionStatus::Active
        } else if elapsed <= self.cfg.idle_ttl {
            SessionStatus::Idle
        } else {
            SessionStatus::Inactive
        }
    }

    pub fn forget(&self, name: &str) {
        self.records.remove(name);
    }
}
