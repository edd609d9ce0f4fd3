//! Resource Watchdog: periodic disk/memory/CPU sampling with two-level
//! thresholds and a per-(metric, severity) cooldown so a sustained
//! condition doesn't spam alerts. The core only emits; it never takes
//! corrective action itself.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Disks, System};

use crate::config::RuntimeConfig;
use crate::events::{AlertSeverity as Severity, EventBus, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Metric {
    Disk,
    Memory,
    Cpu,
}

#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub sampled_at: Instant,
    pub disk_pct: f32,
    pub mem_pct: f32,
    pub cpu_load_per_core: f32,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub key: String,
    pub severity: Severity,
    pub message: String,
}

struct Cooldowns {
    last_fired: Mutex<std::collections::HashMap<(Metric, bool), Instant>>,
}

impl Cooldowns {
    fn new() -> Self {
        Self {
            last_fired: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Returns `true` if an alert for `(metric, critical)` may fire now
    /// (outside its cooldown window), and records the attempt.
    fn try_fire(&self, metric: Metric, critical: bool, cooldown: Duration) -> bool {
        let mut guard = self.last_fired.lock().expect("cooldown mutex");
        let key = (metric, critical);
        let now = Instant::now();
        match guard.get(&key) {
            Some(last) if now.duration_since(*last) < cooldown => false,
            _ => {
                guard.insert(key, now);
                true
            }
        }
    }
}

/// Samples OS resource usage at `watchdog_poll_interval` and emits
/// deduplicated threshold alerts onto the Event Bus.
pub struct Watchdog {
    cfg: Arc<RuntimeConfig>,
    events: EventBus,
    cooldowns: Cooldowns,
    watch_path: PathBuf,
}

impl Watchdog {
    pub fn new(cfg: Arc<RuntimeConfig>, events: EventBus, watch_path: PathBuf) -> Self {
        Self {
            cfg,
            events,
            cooldowns: Cooldowns::new(),
            watch_path,
        }
    }

    pub fn sample(&self) -> ResourceSample {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let mem_pct = if system.total_memory() == 0 {
            0.0
        } else {
            (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
        };

        let cpu_count = system.cpus().len().max(1) as f32;
        let cpu_load_per_core = if system.cpus().is_empty() {
            0.0
        } else {
            system.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / cpu_count
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_pct = disks
            .iter()
            .find(|d| self.watch_path.starts_with(d.mount_point()))
            .map(|d| {
                let total = d.total_space();
                if total == 0 {
                    0.0
                } else {
                    ((total - d.available_space()) as f32 / total as f32) * 100.0
                }
            })
            .unwrap_or(0.0);

        ResourceSample {
            sampled_at: Instant::now(),
            disk_pct,
            mem_pct,
            cpu_load_per_core,
        }
    }

    /// Evaluate one sample against thresholds, returning any alerts
    /// that survived their cooldown.
    pub fn evaluate(&self, sample: &ResourceSample) -> Vec<Alert> {
        let mut alerts = Vec::new();
        self.check_metric(
            Metric::Disk,
            "disk",
            sample.disk_pct,
            self.cfg.disk_warn_pct,
            self.cfg.disk_crit_pct,
            "%",
            &mut alerts,
        );
        self.check_metric(
            Metric::Memory,
            "memory",
            sample.mem_pct,
            self.cfg.mem_warn_pct,
            self.cfg.mem_crit_pct,
            "%",
            &mut alerts,
        );
        self.check_metric(
            Metric::Cpu,
            "cpu",
            sample.cpu_load_per_core,
            self.cfg.cpu_warn_pct,
            self.cfg.cpu_crit_pct,
            "% of one core",
            &mut alerts,
        );
        alerts
    }

    #[allow(clippy::too_many_arguments)]
    fn check_metric(
        &self,
        metric: Metric,
        label: &str,
        value: f32,
        warn: f32,
        crit: f32,
        unit: &str,
        out: &mut Vec<Alert>,
    ) {
        let severity = if value >= crit {
            Some(Severity::Critical)
        } else if value >= warn {
            Some(Severity::Warning)
        } else {
            None
        };
        let Some(severity) = severity else { return };
        let critical = matches!(severity, Severity::Critical);
        if !self.cooldowns.try_fire(metric, critical, self.cfg.alert_cooldown) {
            return;
        }
        out.push(Alert {
            key: format!("{label}:{}", if critical { "critical" } else { "warning" }),
            severity,
            message: format!("{label} at {value:.1}{unit} (threshold {:.1}{unit})", if critical { crit } else { warn }),
        });
    }

    fn publish(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            self.events.publish(SessionEvent::Alert {
                key: alert.key,
                severity: alert.severity,
                message: alert.message,
                ts: chrono::Utc::now(),
            });
        }
    }

    /// Run the sampling loop forever at `watchdog_poll_interval`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cfg.watchdog_poll_interval);
        loop {
            ticker.tick().await;
            let sample = self.sample();
            let alerts = self.evaluate(&sample);
            if !alerts.is_empty() {
                self.publish(alerts);
            }
        }
    }
}
