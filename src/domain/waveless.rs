//! Waveless processing policy.
//!
//! Pure decision logic for continuous admission: how large the next batch
//! should be, how often to tick, which workflows jump the queue, and when
//! admission pauses entirely. The scheduler loop in `runtime` applies
//! these decisions; nothing here performs I/O.

use std::collections::HashMap;

use super::status::WorkflowPriority;
use super::workflow::Workflow;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Workflows waiting longer than this bypass batching entirely.
const IMMEDIATE_WAIT_THRESHOLD_MS: u64 = 60_000;

/// Load score at which admission pauses.
const PAUSE_LOAD_THRESHOLD: f64 = 95.0;

/// Error rate at which admission pauses.
const PAUSE_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Tunable waveless policy; the defaults match production behavior.
#[derive(Debug, Clone)]
pub struct WavelessPolicy {
    pub default_batch_size: u32,
    pub default_tick_interval_ms: u64,
}

impl Default for WavelessPolicy {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl WavelessPolicy {
    /// Batch size adapted to the current system load score.
    ///
    /// Overloaded systems shrink the batch to a quarter, loaded systems to
    /// a half; underutilized systems double it.
    pub fn batch_size_for_load(&self, load_score: f64) -> u32 {
        let d = self.default_batch_size;
        if load_score >= 95.0 {
            (d / 4).max(1)
        } else if load_score >= 85.0 {
            (d / 2).max(1)
        } else if load_score < 50.0 {
            d * 2
        } else {
            d
        }
    }

    /// Tick interval adapted to queue depth: deep queues tick faster.
    pub fn tick_interval_for_queue(&self, queue_depth: usize) -> u64 {
        if queue_depth > 100 {
            500
        } else if queue_depth > 50 {
            1_000
        } else if queue_depth < 10 {
            2_000
        } else {
            self.default_tick_interval_ms
        }
    }

    /// Order candidates by priority (HIGH first) with created-at as the
    /// tie-break, and keep the first `batch_size`.
    pub fn build_batch<'a>(
        &self,
        pending: &'a [Workflow],
        batch_size: usize,
    ) -> Vec<&'a Workflow> {
        let mut sorted: Vec<&Workflow> = pending.iter().collect();
        sorted.sort_by_key(|w| (w.priority.level(), w.created_at_ms));
        sorted.truncate(batch_size);
        sorted
    }

    /// HIGH-priority workflows, and anything that has waited over a
    /// minute, skip batching and dispatch at once.
    pub fn should_process_immediately(&self, workflow: &Workflow, now_ms: u64) -> bool {
        if workflow.priority == WorkflowPriority::High {
            return true;
        }
        now_ms.saturating_sub(workflow.created_at_ms) > IMMEDIATE_WAIT_THRESHOLD_MS
    }

    /// Admission gate: pause the loop when the system is overloaded or the
    /// error rate is out of control.
    pub fn should_pause(&self, load_score: f64, error_rate: f64) -> bool {
        load_score >= PAUSE_LOAD_THRESHOLD || error_rate >= PAUSE_ERROR_RATE_THRESHOLD
    }

    /// Load-derived batch size further adjusted by queue depth: deep
    /// queues double it (capped at 50), shallow queues halve it (floored
    /// at 5).
    pub fn recommended_batch_size(&self, load_score: f64, queue_depth: usize) -> u32 {
        let base = self.batch_size_for_load(load_score);
        if queue_depth > 100 {
            (base * 2).min(50)
        } else if queue_depth < 10 {
            (base / 2).max(5)
        } else {
            base
        }
    }

    /// Summary counters for operators.
    pub fn metrics(&self, workflows: &[Workflow]) -> WavelessMetrics {
        let count_by = |p: WorkflowPriority| workflows.iter().filter(|w| w.priority == p).count();
        let active = workflows.iter().filter(|w| w.is_active()).count();
        let average_progress = if workflows.is_empty() {
            0.0
        } else {
            workflows.iter().map(|w| w.progress_percent()).sum::<f64>() / workflows.len() as f64
        };
        WavelessMetrics {
            total_workflows: workflows.len(),
            high_priority: count_by(WorkflowPriority::High),
            normal_priority: count_by(WorkflowPriority::Normal),
            low_priority: count_by(WorkflowPriority::Low),
            active_workflows: active,
            queue_depth: workflows.len() - active,
            average_progress,
        }
    }
}

/// Point-in-time waveless counters.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelessMetrics {
    pub total_workflows: usize,
    pub high_priority: usize,
    pub normal_priority: usize,
    pub low_priority: usize,
    pub active_workflows: usize,
    pub queue_depth: usize,
    pub average_progress: f64,
}

impl WavelessMetrics {
    /// Flatten into a string-keyed map for event payloads and logs.
    pub fn as_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        map.insert("totalWorkflows".to_string(), self.total_workflows as f64);
        map.insert("highPriority".to_string(), self.high_priority as f64);
        map.insert("normalPriority".to_string(), self.normal_priority as f64);
        map.insert("lowPriority".to_string(), self.low_priority as f64);
        map.insert("activeWorkflows".to_string(), self.active_workflows as f64);
        map.insert("queueDepth".to_string(), self.queue_depth as f64);
        map.insert("averageProgress".to_string(), self.average_progress);
        map
    }
}
