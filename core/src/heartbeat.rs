//! Heartbeat Service: records explicit heartbeats keyed by session name
//! and exposes last-seen, for callers (the external chat/UI gateway)
//! that want last-seen without going through the derived
//! Active/Idle/Inactive status. Feeds the same timestamp into the
//! [`crate::activity::ActivityTracker`] so a heartbeat also counts as
//! one of its three activity sources.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::activity::ActivityTracker;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct HeartbeatService {
    last_seen: DashMap<String, u64>,
    tracker: Arc<ActivityTracker>,
}

impl HeartbeatService {
    pub fn new(tracker: Arc<ActivityTracker>) -> Self {
        Self {
            last_seen: DashMap::new(),
            tracker,
        }
    }

    pub fn beat(&self, name: &str) {
        self.last_seen.insert(name.to_string(), now_millis());
        self.tracker.record_heartbeat(name);
    }

    pub fn last_seen(&self, name: &str) -> Option<u64> {
        self.last_seen.get(name).map(|v| *v)
    }

    pub fn forget(&self, name: &str) {
        self.last_seen.remove(name);
    }
}
