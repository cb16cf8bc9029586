//! Load metrics for balancing decisions.
//!
//! A [`LoadSnapshot`] is one observation of a downstream service; a
//! [`ServiceLoad`] aggregates a bounded history of snapshots per service
//! for trend analysis. Both live in process memory only; history does not
//! survive restarts.

use serde::{Deserialize, Serialize};

/// Snapshots kept per service for trend analysis.
const HISTORY_CAPACITY: usize = 100;

/// Queue depth treated as 100% when normalizing the queue score.
const QUEUE_DEPTH_SCALE: f64 = 1_000.0;

pub const DEFAULT_TARGET_UTILIZATION: f64 = 85.0;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 95.0;

/// One observation of a service's load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub service_id: String,
    pub service_name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_requests: u32,
    pub queue_depth: u32,
    pub avg_response_time_ms: u64,
    /// Error rate in 0..1.
    pub error_rate: f64,
    pub timestamp_ms: u64,
    #[serde(default = "default_target")]
    pub target_utilization: f64,
    #[serde(default = "default_critical")]
    pub critical_threshold: f64,
}

fn default_target() -> f64 {
    DEFAULT_TARGET_UTILIZATION
}

fn default_critical() -> f64 {
    DEFAULT_CRITICAL_THRESHOLD
}

impl LoadSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_id: &str,
        service_name: &str,
        cpu_percent: f64,
        memory_percent: f64,
        active_requests: u32,
        queue_depth: u32,
        avg_response_time_ms: u64,
        error_rate: f64,
        now_ms: u64,
    ) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            cpu_percent,
            memory_percent,
            active_requests,
            queue_depth,
            avg_response_time_ms,
            error_rate,
            timestamp_ms: now_ms,
            target_utilization: DEFAULT_TARGET_UTILIZATION,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }

    /// Weighted blend of cpu, memory, queue and error pressure, 0..100.
    pub fn load_score(&self) -> f64 {
        let queue_score = ((self.queue_depth as f64 / QUEUE_DEPTH_SCALE) * 100.0).min(100.0);
        let error_score = self.error_rate * 100.0;
        self.cpu_percent * 0.3 + self.memory_percent * 0.3 + queue_score * 0.2 + error_score * 0.2
    }

    pub fn is_overloaded(&self) -> bool {
        self.load_score() >= self.critical_threshold
    }

    pub fn needs_rebalance(&self) -> bool {
        self.load_score() >= self.target_utilization || self.error_rate > 0.5
    }

    pub fn can_accept_work(&self) -> bool {
        self.load_score() < self.target_utilization && self.error_rate < 0.3
    }

    /// Headroom below full load, 0..100.
    pub fn available_capacity(&self) -> f64 {
        (100.0 - self.load_score()).max(0.0)
    }

    /// Trip when enough traffic exists to trust the error rate.
    pub fn should_trip_circuit_breaker(&self, error_threshold: f64, min_requests: u32) -> bool {
        self.active_requests >= min_requests && self.error_rate >= error_threshold
    }

    pub fn has_acceptable_response_time(&self, max_response_time_ms: u64) -> bool {
        self.avg_response_time_ms <= max_response_time_ms
    }
}

/// Bounded per-service snapshot history with trend queries.
#[derive(Debug, Clone)]
pub struct ServiceLoad {
    pub service_id: String,
    pub service_name: String,
    history: Vec<LoadSnapshot>,
}

impl ServiceLoad {
    pub fn new(service_id: &str, service_name: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            history: Vec::new(),
        }
    }

    /// Record a snapshot, evicting the oldest beyond capacity.
    pub fn record(&mut self, snapshot: LoadSnapshot) {
        self.history.push(snapshot);
        if self.history.len() > HISTORY_CAPACITY {
            self.history.remove(0);
        }
    }

    pub fn latest(&self) -> Option<&LoadSnapshot> {
        self.history.last()
    }

    /// Current load score; 0 when nothing has been observed yet.
    pub fn current_score(&self) -> f64 {
        self.latest().map(LoadSnapshot::load_score).unwrap_or(0.0)
    }

    /// Average score over the trailing window; falls back to the current
    /// score when the window is empty.
    pub fn average_load(&self, window_ms: u64, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(window_ms);
        let recent: Vec<f64> = self
            .history
            .iter()
            .filter(|s| s.timestamp_ms > cutoff)
            .map(LoadSnapshot::load_score)
            .collect();
        if recent.is_empty() {
            return self.current_score();
        }
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    /// Load is trending upward when the newest of the last five snapshots
    /// scores more than 10% above the oldest of them.
    pub fn is_load_increasing(&self) -> bool {
        if self.history.len() < 5 {
            return false;
        }
        let window = &self.history[self.history.len() - 5..];
        let first = window[0].load_score();
        let last = window[window.len() - 1].load_score();
        last > first * 1.1
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, mem: f64, queue: u32, error_rate: f64, at: u64) -> LoadSnapshot {
        LoadSnapshot::new("inventory", "Inventory", cpu, mem, 20, queue, 50, error_rate, at)
    }

    #[test]
    fn load_score_weights() {
        // cpu 80 * .3 + mem 60 * .3 + queue (500/1000*100=50) * .2 + error (0.1*100=10) * .2
        let s = snapshot(80.0, 60.0, 500, 0.1, 0);
        assert!((s.load_score() - (24.0 + 18.0 + 10.0 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn queue_score_caps_at_100() {
        let s = snapshot(0.0, 0.0, 5_000, 0.0, 0);
        assert!((s.load_score() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn classification_thresholds() {
        let hot = snapshot(100.0, 100.0, 1_000, 1.0, 0);
        assert!(hot.is_overloaded());
        assert!(hot.needs_rebalance());
        assert!(!hot.can_accept_work());

        let idle = snapshot(10.0, 10.0, 0, 0.0, 0);
        assert!(!idle.is_overloaded());
        assert!(!idle.needs_rebalance());
        assert!(idle.can_accept_work());
        assert!(idle.available_capacity() > 90.0);

        // High error rate alone forces a rebalance even at low load.
        let flaky = snapshot(10.0, 10.0, 0, 0.6, 0);
        assert!(flaky.needs_rebalance());
        assert!(!flaky.can_accept_work());
    }

    #[test]
    fn circuit_breaker_needs_minimum_traffic() {
        let mut s = snapshot(0.0, 0.0, 0, 0.9, 0);
        s.active_requests = 5;
        assert!(!s.should_trip_circuit_breaker(0.5, 10));
        s.active_requests = 10;
        assert!(s.should_trip_circuit_breaker(0.5, 10));
        s.error_rate = 0.4;
        assert!(!s.should_trip_circuit_breaker(0.5, 10));
    }

    #[test]
    fn history_is_bounded() {
        let mut load = ServiceLoad::new("inventory", "Inventory");
        for i in 0..150u64 {
            load.record(snapshot(10.0, 10.0, 0, 0.0, i));
        }
        assert_eq!(load.history_len(), 100);
        assert_eq!(load.latest().unwrap().timestamp_ms, 149);
    }

    #[test]
    fn average_load_uses_window() {
        let mut load = ServiceLoad::new("inventory", "Inventory");
        load.record(snapshot(100.0, 100.0, 0, 0.0, 1_000));
        load.record(snapshot(20.0, 20.0, 0, 0.0, 10_000));
        // Window only covers the second snapshot.
        let avg = load.average_load(5_000, 12_000);
        assert!((avg - 12.0).abs() < 1e-9);
        // Wide window covers both.
        let avg = load.average_load(60_000, 12_000);
        assert!((avg - 36.0).abs() < 1e-9);
    }

    #[test]
    fn trend_detection_requires_five_samples() {
        let mut load = ServiceLoad::new("inventory", "Inventory");
        for i in 0..4u64 {
            load.record(snapshot(10.0 + i as f64 * 20.0, 0.0, 0, 0.0, i));
        }
        assert!(!load.is_load_increasing());
        load.record(snapshot(90.0, 0.0, 0, 0.0, 5));
        assert!(load.is_load_increasing());

        let mut flat = ServiceLoad::new("robots", "Robots");
        for i in 0..5u64 {
            flat.record(snapshot(50.0, 0.0, 0, 0.0, i));
        }
        assert!(!flat.is_load_increasing());
    }
}
