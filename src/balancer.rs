//! Load-balancing controller.
//!
//! Tracks per-service load observations behind a mutex, answers target
//! selection for new work, and decides when the system needs rebalancing
//! or must pause waveless admission. Thresholds arrive through
//! [`LoadBalancerConfig`] at construction; there is no global state.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::domain::load::{
    LoadSnapshot, ServiceLoad, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_TARGET_UTILIZATION,
};

/// Load-score spread across services that counts as uneven distribution.
const UNEVEN_SPREAD_THRESHOLD: f64 = 30.0;

/// Minimum in-flight requests before the error rate is trusted for
/// circuit-breaker decisions.
const CIRCUIT_BREAKER_MIN_REQUESTS: u32 = 10;

/// Thresholds for balancing decisions.
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    pub target_utilization: f64,
    pub critical_threshold: f64,
    pub error_rate_threshold: f64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            target_utilization: DEFAULT_TARGET_UTILIZATION,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            error_rate_threshold: 0.5,
        }
    }
}

/// Coarse health classification for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Critical => "CRITICAL",
        }
    }
}

/// Load-trend classification over a service's recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Process-wide load controller.
///
/// The snapshot map is mutated by the load-monitor loop and read by the
/// scheduler when selecting targets; a mutex internal to the controller
/// guards it.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    services: Mutex<HashMap<String, ServiceLoad>>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> Self {
        Self {
            config,
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Record one observation for a service.
    pub fn observe(&self, snapshot: LoadSnapshot) {
        let mut services = self.services.lock().expect("load map poisoned");
        let entry = services
            .entry(snapshot.service_id.clone())
            .or_insert_with(|| ServiceLoad::new(&snapshot.service_id, &snapshot.service_name));
        entry.record(snapshot);
    }

    /// Latest snapshot per service.
    pub fn snapshot_map(&self) -> HashMap<String, LoadSnapshot> {
        let services = self.services.lock().expect("load map poisoned");
        services
            .iter()
            .filter_map(|(id, load)| load.latest().map(|s| (id.clone(), s.clone())))
            .collect()
    }

    /// Latest load score per service.
    pub fn score_map(&self) -> HashMap<String, f64> {
        let services = self.services.lock().expect("load map poisoned");
        services
            .iter()
            .map(|(id, load)| (id.clone(), load.current_score()))
            .collect()
    }

    /// Rebalancing is needed when any service is overloaded or the load
    /// spread between the hottest and coolest service exceeds 30 points.
    pub fn needs_rebalance(&self) -> bool {
        let snapshots = self.snapshot_map();
        if snapshots.is_empty() {
            return false;
        }
        if snapshots.values().any(LoadSnapshot::is_overloaded) {
            warn!("overloaded service detected; rebalancing needed");
            return true;
        }
        let scores: Vec<f64> = snapshots.values().map(LoadSnapshot::load_score).collect();
        let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if snapshots.len() >= 2 && max - min > UNEVEN_SPREAD_THRESHOLD {
            info!(spread = max - min, "load distribution uneven; rebalancing recommended");
            return true;
        }
        false
    }

    /// Per-service target loads. The scheduler applies the targets when
    /// it places future admissions; nothing is moved here.
    pub fn rebalance_targets(&self) -> HashMap<String, f64> {
        let target = self.config.target_utilization;
        let critical = self.config.critical_threshold;
        self.snapshot_map()
            .into_iter()
            .map(|(service_id, snapshot)| {
                let current = snapshot.load_score();
                let desired = if current > critical {
                    target * 0.8
                } else if current > target {
                    target
                } else if current < target * 0.5 {
                    target * 0.7
                } else {
                    current
                };
                (service_id, desired)
            })
            .collect()
    }

    /// Pick the least-loaded service that can accept work and is not
    /// drowning in errors. Empty means every target is saturated and the
    /// scheduler should yield.
    pub fn select_target(&self) -> Option<String> {
        let snapshots = self.snapshot_map();
        let mut candidates: Vec<(String, f64)> = snapshots
            .into_iter()
            .filter(|(_, s)| s.can_accept_work() && s.error_rate < self.config.error_rate_threshold)
            .map(|(id, s)| (id, s.load_score()))
            .collect();
        if candidates.is_empty() {
            warn!("no services available to accept new work");
            return None;
        }
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let (selected, score) = candidates.remove(0);
        debug!(service_id = %selected, score, "selected target for new work");
        Some(selected)
    }

    /// Circuit-breaker decision for one service.
    pub fn should_trip_circuit_breaker(&self, service_id: &str) -> bool {
        self.snapshot_map()
            .get(service_id)
            .map(|s| {
                s.should_trip_circuit_breaker(
                    self.config.error_rate_threshold,
                    CIRCUIT_BREAKER_MIN_REQUESTS,
                )
            })
            .unwrap_or(false)
    }

    /// Health classification for one service.
    pub fn health_status(&self, service_id: &str) -> Option<HealthStatus> {
        let snapshots = self.snapshot_map();
        let snapshot = snapshots.get(service_id)?;
        let load = snapshot.load_score();
        let status = if load < self.config.target_utilization
            && snapshot.error_rate <= self.config.error_rate_threshold
        {
            HealthStatus::Healthy
        } else if snapshot.error_rate > self.config.error_rate_threshold {
            HealthStatus::Degraded
        } else if load >= self.config.critical_threshold {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        };
        Some(status)
    }

    /// Average headroom across all services, 0..100.
    pub fn available_capacity(&self) -> f64 {
        let snapshots = self.snapshot_map();
        if snapshots.is_empty() {
            return 0.0;
        }
        snapshots
            .values()
            .map(LoadSnapshot::available_capacity)
            .sum::<f64>()
            / snapshots.len() as f64
    }

    /// Trend classification against a trailing five-minute average.
    pub fn load_trend(&self, service_id: &str, now_ms: u64) -> Option<LoadTrend> {
        let services = self.services.lock().expect("load map poisoned");
        let load = services.get(service_id)?;
        if load.is_load_increasing() {
            return Some(LoadTrend::Increasing);
        }
        let current = load.current_score();
        let average = load.average_load(5 * 60 * 1_000, now_ms);
        if current < average * 0.9 {
            Some(LoadTrend::Decreasing)
        } else {
            Some(LoadTrend::Stable)
        }
    }

    /// Waveless admission gate: pause when any service is past the
    /// critical threshold or the worst error rate crosses the limit.
    pub fn should_pause_admission(&self) -> bool {
        let snapshots = self.snapshot_map();
        if snapshots.is_empty() {
            return false;
        }
        let max_score = snapshots
            .values()
            .map(LoadSnapshot::load_score)
            .fold(0.0_f64, f64::max);
        let max_error_rate = snapshots.values().map(|s| s.error_rate).fold(0.0_f64, f64::max);
        if max_score >= self.config.critical_threshold {
            warn!(max_score, "system overloaded; pausing waveless admission");
            return true;
        }
        if max_error_rate >= self.config.error_rate_threshold {
            warn!(max_error_rate, "error rate too high; pausing waveless admission");
            return true;
        }
        false
    }

    /// Highest load score across services; 0 with no observations.
    pub fn max_load_score(&self) -> f64 {
        self.snapshot_map()
            .values()
            .map(LoadSnapshot::load_score)
            .fold(0.0_f64, f64::max)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancerConfig::default())
    }
}
