//! Event Bus: internal pub-sub for session-state changes, consumed by
//! external UI/chat gateways. Core only publishes; external consumers
//! subscribe.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::registry::SessionStatus;

/// Distinguishes the reserved orchestrator session from any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Orchestrator,
    TeamMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReason {
    RuntimeExited,
    Killed,
    ReadinessTimeout,
    Restarted,
}

/// Watchdog alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created {
        name: String,
        role: String,
        team_id: Option<String>,
    },
    Ready {
        name: String,
    },
    Status {
        name: String,
        status: SessionStatus,
        reason: StatusReason,
        session_role: SessionRole,
        error: Option<String>,
    },
    Output {
        name: String,
        bytes: Bytes,
    },
    /// Resource Watchdog threshold alert; not tied to any particular
    /// session.
    Alert {
        key: String,
        severity: AlertSeverity,
        message: String,
        ts: DateTime<Utc>,
    },
}

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error: fire-and-forget into subscribers.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn session_role_for(name: &str, orchestrator_session: &str) -> SessionRole {
    if name == orchestrator_session {
        SessionRole::Orchestrator
    } else {
        SessionRole::TeamMember
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_role_matches_reserved_name() {
        assert_eq!(session_role_for("orchestrator", "orchestrator"), SessionRole::Orchestrator);
        assert_eq!(session_role_for("dev-1", "orchestrator"), SessionRole::TeamMember);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::Ready {
            name: "dev-1".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Ready { name } if name == "dev-1"));
    }
}
