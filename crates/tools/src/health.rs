//! Tool Health Tracker: a per-provider circuit breaker.
//!
//! ```text
//!             failure               failure x (unhealthy - degraded)
//!  Healthy ──────────▶ ... Degraded ──────────────────────────▶ Unhealthy
//!     ▲                                                            │
//!     └──────────────────────── any success ───────────────────────┘
//! ```
//!
//! One tracker is shared by every in-flight request. The provider map is
//! behind an `RwLock` that is only held to find or insert an entry; each
//! entry has its own `Mutex`, so concurrent reports for one provider
//! serialize and no failure is lost.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Provider health as seen by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Read-only view of one provider's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHealth {
    pub consecutive_failures: u32,
    pub status: HealthStatus,
}

impl Default for ToolHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            status: HealthStatus::Healthy,
        }
    }
}

/// Failure thresholds and probe window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub degraded: u32,
    pub unhealthy: u32,
    /// How long after the last failure an unhealthy provider may be probed.
    /// `None` disables probing.
    pub probe_after: Option<Duration>,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded: 2,
            unhealthy: 3,
            probe_after: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Default)]
struct Entry {
    health: ToolHealth,
    last_failure: Option<Instant>,
}

/// Shared registry of provider health.
///
/// Only `get`, `mark_success` and `mark_failure` are used on the request
/// path; `reset`, `reset_all` and `snapshot` are for operators and tests.
#[derive(Debug)]
pub struct HealthTracker {
    thresholds: HealthThresholds,
    entries: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl HealthTracker {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    fn existing(&self, provider: &str) -> Option<Arc<Mutex<Entry>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    fn entry(&self, provider: &str) -> Arc<Mutex<Entry>> {
        if let Some(entry) = self.existing(provider) {
            return entry;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(provider.to_string())
            .or_default()
            .clone()
    }

    /// Current health. Unknown providers are healthy.
    pub fn get(&self, provider: &str) -> ToolHealth {
        self.existing(provider)
            .map(|e| e.lock().unwrap_or_else(PoisonError::into_inner).health)
            .unwrap_or_default()
    }

    /// A single success restores the provider to healthy.
    pub fn mark_success(&self, provider: &str) {
        let entry = self.entry(provider);
        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if entry.health.status != HealthStatus::Healthy {
            info!(provider, "Tool provider recovered");
        }
        entry.health = ToolHealth::default();
        entry.last_failure = None;
    }

    /// Count one failure and return the resulting health.
    pub fn mark_failure(&self, provider: &str) -> ToolHealth {
        let entry = self.entry(provider);
        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = entry.health.status;
        let failures = entry.health.consecutive_failures.saturating_add(1);
        let status = self.status_for(failures);
        entry.health = ToolHealth {
            consecutive_failures: failures,
            status,
        };
        entry.last_failure = Some(Instant::now());

        if status != previous {
            warn!(
                provider,
                consecutive_failures = failures,
                status = ?status,
                "Tool provider health changed"
            );
        }
        entry.health
    }

    fn status_for(&self, failures: u32) -> HealthStatus {
        if failures >= self.thresholds.unhealthy {
            HealthStatus::Unhealthy
        } else if failures >= self.thresholds.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Whether an unhealthy provider has been quiet long enough to be
    /// offered again. The probe's outcome decides what happens next.
    pub fn probe_due(&self, provider: &str) -> bool {
        let Some(window) = self.thresholds.probe_after else {
            return false;
        };
        let Some(entry) = self.existing(provider) else {
            return false;
        };
        let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry.health.status == HealthStatus::Unhealthy
            && entry.last_failure.is_some_and(|at| at.elapsed() >= window)
    }

    /// Forget one provider's failures.
    pub fn reset(&self, provider: &str) {
        if let Some(entry) = self.existing(provider) {
            *entry.lock().unwrap_or_else(PoisonError::into_inner) = Entry::default();
            info!(provider, "Tool provider health reset");
        }
    }

    /// Forget every provider's failures. Entries are reset in place so a
    /// report already holding one still lands on the tracked entry.
    pub fn reset_all(&self) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            *entry.lock().unwrap_or_else(PoisonError::into_inner) = Entry::default();
        }
        info!(providers = entries.len(), "All tool provider health reset");
    }

    /// Copy of every tracked provider's health, sorted by provider name.
    pub fn snapshot(&self) -> Vec<(String, ToolHealth)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(String, ToolHealth)> = entries
            .iter()
            .map(|(name, e)| {
                (
                    name.clone(),
                    e.lock().unwrap_or_else(PoisonError::into_inner).health,
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_healthy() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.get("weather"), ToolHealth::default());
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn failures_walk_the_state_machine() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.mark_failure("weather").status, HealthStatus::Healthy);
        assert_eq!(tracker.mark_failure("weather").status, HealthStatus::Degraded);
        let health = tracker.mark_failure("weather");
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 3);
    }

    #[test]
    fn one_success_resets_to_healthy() {
        let tracker = HealthTracker::default();
        for _ in 0..3 {
            tracker.mark_failure("weather");
        }
        tracker.mark_success("weather");
        assert_eq!(
            tracker.get("weather"),
            ToolHealth {
                consecutive_failures: 0,
                status: HealthStatus::Healthy
            }
        );
    }

    #[test]
    fn providers_are_independent() {
        let tracker = HealthTracker::default();
        tracker.mark_failure("weather");
        tracker.mark_failure("weather");
        assert_eq!(tracker.get("calendar").status, HealthStatus::Healthy);
        assert_eq!(tracker.get("weather").status, HealthStatus::Degraded);
    }

    #[test]
    fn probe_window() {
        let tracker = HealthTracker::new(HealthThresholds {
            degraded: 1,
            unhealthy: 1,
            probe_after: Some(Duration::ZERO),
        });
        assert!(!tracker.probe_due("weather"));
        tracker.mark_failure("weather");
        assert!(tracker.probe_due("weather"));

        let no_probe = HealthTracker::new(HealthThresholds {
            probe_after: None,
            ..HealthThresholds::default()
        });
        for _ in 0..3 {
            no_probe.mark_failure("weather");
        }
        assert!(!no_probe.probe_due("weather"));
    }

    #[test]
    fn admin_resets() {
        let tracker = HealthTracker::default();
        tracker.mark_failure("a");
        tracker.mark_failure("b");
        tracker.reset("a");
        assert_eq!(tracker.get("a").consecutive_failures, 0);
        assert_eq!(tracker.get("b").consecutive_failures, 1);

        let names: Vec<String> = tracker.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);

        tracker.reset_all();
        assert!(tracker
            .snapshot()
            .iter()
            .all(|(_, h)| h.status == HealthStatus::Healthy && h.consecutive_failures == 0));
    }

    #[test]
    fn failure_racing_reset_all_is_kept() {
        let tracker = HealthTracker::default();
        tracker.mark_failure("weather");
        // A report that already looked up its entry before the reset
        let in_flight = tracker.entry("weather");

        tracker.reset_all();
        assert_eq!(tracker.get("weather").consecutive_failures, 0);

        in_flight.lock().unwrap().health.consecutive_failures += 1;
        assert_eq!(tracker.get("weather").consecutive_failures, 1);
        assert!(Arc::ptr_eq(&in_flight, &tracker.entry("weather")));
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let tracker = Arc::new(HealthTracker::new(HealthThresholds {
            degraded: 50,
            unhealthy: 100,
            probe_after: None,
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        tracker.mark_failure("flaky");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let health = tracker.get("flaky");
        assert_eq!(health.consecutive_failures, 200);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
