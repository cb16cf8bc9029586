//! Step execution entity.
//!
//! A step is one unit of remote work owned by exactly one workflow. It has
//! its own state machine (see [`StepStatus`]), retry budget, and optional
//! compensation descriptor. All mutations take the current time explicitly;
//! the entity performs no I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::compensation::CompensationAction;
use super::error::{StateError, WorkflowError};
use super::result::StepResult;
use super::retry::RetryPolicy;
use super::status::StepStatus;

const DEFAULT_STEP_TIMEOUT_MS: u64 = 5_000;

/// Runtime state of a single workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    /// Downstream service this step targets.
    pub service_name: String,
    pub operation: String,
    pub execution_order: u32,
    pub status: StepStatus,
    pub input: HashMap<String, serde_json::Value>,
    pub output: HashMap<String, serde_json::Value>,
    pub result: Option<StepResult>,
    pub error: Option<WorkflowError>,
    pub retry_policy: RetryPolicy,
    /// Failures observed so far; bumped when the step fails.
    pub retry_count: u32,
    pub retries_remaining: u32,
    pub compensation: Option<CompensationAction>,
    pub timeout_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub compensated: bool,
    pub compensated_at_ms: Option<u64>,
}

impl StepExecution {
    /// Create a pending step with the default retry policy and timeout.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        step_id: &str,
        step_name: &str,
        step_type: &str,
        service_name: &str,
        operation: &str,
        execution_order: u32,
        input: HashMap<String, serde_json::Value>,
        timeout_ms: Option<u64>,
    ) -> Self {
        let retry_policy = RetryPolicy::default();
        let retries_remaining = retry_policy.max_retries;
        Self {
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            step_type: step_type.to_string(),
            service_name: service_name.to_string(),
            operation: operation.to_string(),
            execution_order,
            status: StepStatus::Pending,
            input,
            output: HashMap::new(),
            result: None,
            error: None,
            retry_policy,
            retry_count: 0,
            retries_remaining,
            compensation: None,
            timeout_ms: timeout_ms.unwrap_or(DEFAULT_STEP_TIMEOUT_MS),
            started_at_ms: None,
            completed_at_ms: None,
            compensated: false,
            compensated_at_ms: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retries_remaining = policy.max_retries;
        self.retry_policy = policy;
        self
    }

    pub fn with_compensation(mut self, action: CompensationAction) -> Self {
        self.compensation = Some(action);
        self
    }

    /// Begin executing. Legal from PENDING and from FAILED (direct restart).
    pub fn start(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != StepStatus::Pending && self.status != StepStatus::Failed {
            return Err(StateError::invalid(format!(
                "step {} can only start from PENDING or FAILED, was {}",
                self.step_id, self.status
            )));
        }
        self.status = StepStatus::Executing;
        self.started_at_ms = Some(now_ms);
        Ok(())
    }

    /// Record a successful result. Legal only while EXECUTING.
    pub fn mark_completed(&mut self, result: StepResult, now_ms: u64) -> Result<(), StateError> {
        if self.status != StepStatus::Executing {
            return Err(StateError::invalid(format!(
                "step {} can only complete while EXECUTING, was {}",
                self.step_id, self.status
            )));
        }
        self.output = result.output.clone();
        self.result = Some(result);
        self.status = StepStatus::Completed;
        self.completed_at_ms = Some(now_ms);
        Ok(())
    }

    /// Record a failure. Bumps the attempt counters so the failure event
    /// carries the attempt number and the retry gate sees fresh state.
    pub fn mark_failed(&mut self, error: WorkflowError, now_ms: u64) -> Result<(), StateError> {
        if self.status != StepStatus::Executing {
            return Err(StateError::invalid(format!(
                "step {} can only fail while EXECUTING, was {}",
                self.step_id, self.status
            )));
        }
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.completed_at_ms = Some(now_ms);
        self.retry_count += 1;
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        Ok(())
    }

    /// Reset a failed step so it can be re-admitted. Clears the previous
    /// error and timestamps; the attempt counters were already advanced
    /// when the failure was recorded.
    pub fn retry(&mut self) -> Result<(), StateError> {
        if !self.can_retry() {
            return Err(StateError::invalid(format!(
                "step {} cannot be retried (status {}, {} retries remaining)",
                self.step_id, self.status, self.retries_remaining
            )));
        }
        self.status = StepStatus::Pending;
        self.error = None;
        self.started_at_ms = None;
        self.completed_at_ms = None;
        Ok(())
    }

    /// Begin compensating a completed step.
    pub fn compensate(&mut self) -> Result<(), StateError> {
        if self.status != StepStatus::Completed {
            return Err(StateError::invalid(format!(
                "step {} can only be compensated from COMPLETED, was {}",
                self.step_id, self.status
            )));
        }
        if self.compensation.is_none() {
            return Err(StateError::invalid(format!(
                "no compensation action defined for step {}",
                self.step_id
            )));
        }
        self.status = StepStatus::Compensating;
        Ok(())
    }

    /// Record that compensation finished. Idempotent: re-marking an
    /// already-COMPENSATED step is a no-op.
    pub fn mark_compensated(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status == StepStatus::Compensated {
            return Ok(());
        }
        if self.status != StepStatus::Compensating {
            return Err(StateError::invalid(format!(
                "step {} can only be marked compensated while COMPENSATING, was {}",
                self.step_id, self.status
            )));
        }
        self.status = StepStatus::Compensated;
        self.compensated = true;
        self.compensated_at_ms = Some(now_ms);
        Ok(())
    }

    /// Skip the step, recording the reason in its output.
    pub fn skip(&mut self, reason: &str, now_ms: u64) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::invalid(format!(
                "step {} is already terminal ({})",
                self.step_id, self.status
            )));
        }
        self.status = StepStatus::Skipped;
        self.completed_at_ms = Some(now_ms);
        if self.output.is_empty() {
            self.output
                .insert("skipped".to_string(), serde_json::Value::Bool(true));
            self.output.insert(
                "reason".to_string(),
                serde_json::Value::String(reason.to_string()),
            );
        }
        Ok(())
    }

    /// Whether forward recovery may re-admit this step.
    pub fn can_retry(&self) -> bool {
        self.status == StepStatus::Failed
            && self.retries_remaining > 0
            && self.retry_policy.can_retry(self.retry_count)
    }

    /// Timeout detection: still executing past the per-step budget.
    pub fn has_timed_out(&self, now_ms: u64) -> bool {
        match (self.status, self.started_at_ms) {
            (StepStatus::Executing, Some(started)) => now_ms.saturating_sub(started) > self.timeout_ms,
            _ => false,
        }
    }

    /// Backoff delay for the next retry of this step.
    pub fn retry_delay_ms(&self) -> u64 {
        self.retry_policy
            .delay_for_attempt(self.retry_count.saturating_sub(1))
    }

    /// A step needs compensation iff it completed and declares how to undo.
    pub fn requires_compensation(&self) -> bool {
        self.status == StepStatus::Completed && self.compensation.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.completed_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    fn step() -> StepExecution {
        StepExecution::new(
            "reserve-inventory",
            "Reserve Inventory",
            "task",
            "inventory-service",
            "reserve",
            1,
            HashMap::new(),
            None,
        )
    }

    fn timeout_error(now: u64) -> WorkflowError {
        WorkflowError::timeout("reserve-inventory", "inventory-service", 5_000, now)
    }

    #[test]
    fn happy_lifecycle() {
        let mut s = step();
        s.start(1_000).unwrap();
        assert_eq!(s.status, StepStatus::Executing);
        assert_eq!(s.started_at_ms, Some(1_000));

        let result = StepResult::success("reserve-inventory", HashMap::new(), 200, 1_200);
        s.mark_completed(result, 1_200).unwrap();
        assert_eq!(s.status, StepStatus::Completed);
        assert_eq!(s.duration_ms(), Some(200));
    }

    #[test]
    fn cannot_start_twice() {
        let mut s = step();
        s.start(0).unwrap();
        assert!(matches!(s.start(1), Err(StateError::InvalidState { .. })));
    }

    #[test]
    fn cannot_complete_pending_step() {
        let mut s = step();
        let result = StepResult::success("reserve-inventory", HashMap::new(), 0, 0);
        assert!(s.mark_completed(result, 0).is_err());
    }

    #[test]
    fn failure_advances_attempt_counters() {
        let mut s = step();
        s.start(0).unwrap();
        s.mark_failed(timeout_error(100), 100).unwrap();
        assert_eq!(s.status, StepStatus::Failed);
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.retries_remaining, 2);
        assert!(s.can_retry());
    }

    #[test]
    fn retry_budget_exhausts() {
        let mut s = step();
        for round in 0..3u64 {
            s.start(round * 100).unwrap();
            s.mark_failed(timeout_error(round * 100 + 50), round * 100 + 50)
                .unwrap();
            if round < 2 {
                s.retry().unwrap();
            }
        }
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.retries_remaining, 0);
        assert!(!s.can_retry());
        assert!(s.retry().is_err());
    }

    #[test]
    fn retry_clears_error_and_timestamps() {
        let mut s = step();
        s.start(0).unwrap();
        s.mark_failed(timeout_error(50), 50).unwrap();
        s.retry().unwrap();
        assert_eq!(s.status, StepStatus::Pending);
        assert!(s.error.is_none());
        assert!(s.started_at_ms.is_none());
        assert!(s.completed_at_ms.is_none());
        // Counters survive the reset.
        assert_eq!(s.retry_count, 1);
    }

    #[test]
    fn retry_delay_follows_backoff() {
        let mut s = step();
        s.start(0).unwrap();
        s.mark_failed(timeout_error(10), 10).unwrap();
        assert_eq!(s.retry_delay_ms(), 1_000);
        s.retry().unwrap();
        s.start(20).unwrap();
        s.mark_failed(timeout_error(30), 30).unwrap();
        assert_eq!(s.retry_delay_ms(), 2_000);
    }

    #[test]
    fn compensation_requires_completed_and_action() {
        let mut s = step().with_compensation(CompensationAction::reverse_operation(
            "reserve-inventory",
            "inventory-service",
            "release",
            HashMap::new(),
        ));
        assert!(s.compensate().is_err()); // still pending

        s.start(0).unwrap();
        let result = StepResult::success("reserve-inventory", HashMap::new(), 10, 10);
        s.mark_completed(result, 10).unwrap();
        assert!(s.requires_compensation());

        s.compensate().unwrap();
        assert_eq!(s.status, StepStatus::Compensating);
        s.mark_compensated(20).unwrap();
        assert_eq!(s.status, StepStatus::Compensated);
        assert!(s.compensated);
    }

    #[test]
    fn compensation_without_action_rejected() {
        let mut s = step();
        s.start(0).unwrap();
        let result = StepResult::success("reserve-inventory", HashMap::new(), 10, 10);
        s.mark_completed(result, 10).unwrap();
        assert!(!s.requires_compensation());
        assert!(s.compensate().is_err());
    }

    #[test]
    fn mark_compensated_is_idempotent() {
        let mut s = step().with_compensation(CompensationAction::reverse_operation(
            "reserve-inventory",
            "inventory-service",
            "release",
            HashMap::new(),
        ));
        s.start(0).unwrap();
        let result = StepResult::success("reserve-inventory", HashMap::new(), 10, 10);
        s.mark_completed(result, 10).unwrap();
        s.compensate().unwrap();
        s.mark_compensated(20).unwrap();
        let before = s.clone();
        s.mark_compensated(99).unwrap();
        assert_eq!(s, before);
    }

    #[test]
    fn compensated_only_reachable_via_compensating() {
        let mut s = step();
        assert!(s.mark_compensated(0).is_err());
        s.start(0).unwrap();
        assert!(s.mark_compensated(1).is_err());
    }

    #[test]
    fn timeout_detection() {
        let mut s = step();
        assert!(!s.has_timed_out(10_000));
        s.start(0).unwrap();
        assert!(!s.has_timed_out(5_000));
        assert!(s.has_timed_out(5_001));
    }

    #[test]
    fn skip_records_reason() {
        let mut s = step();
        s.skip("optional step disabled", 42).unwrap();
        assert_eq!(s.status, StepStatus::Skipped);
        assert_eq!(s.output.get("skipped"), Some(&serde_json::Value::Bool(true)));
        assert!(s.skip("again", 43).is_err());
    }

    #[test]
    fn error_kind_is_preserved() {
        let mut s = step();
        s.start(0).unwrap();
        s.mark_failed(timeout_error(5), 5).unwrap();
        assert_eq!(s.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }
}
