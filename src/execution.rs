//! Per-step execution service.
//!
//! The entry point into the core for each step outcome: it validates the
//! workflow and step state, applies aggregate mutations, and routes
//! failures into the saga coordinator's forward or backward recovery.
//! Like the coordinator it performs no I/O; the transactional wrapper
//! (lock, load, persist, publish) lives in the client layer.

use tracing::{debug, info, warn};

use crate::domain::definition::WorkflowDefinition;
use crate::domain::error::{StateError, WorkflowError};
use crate::domain::result::StepResult;
use crate::domain::status::StepStatus;
use crate::domain::workflow::Workflow;
use crate::saga::SagaCoordinator;

/// Default wall-clock budget for a whole workflow (5 minutes).
const DEFAULT_WORKFLOW_BUDGET_MS: u64 = 300_000;

/// What happened after a step failure was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Forward recovery: re-admit the step after the given delay.
    WillRetry { delay_ms: u64 },
    /// The workflow failed; compensation may have started.
    Failed { compensation_started: bool },
}

/// Drives individual steps through their lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ExecutionService {
    saga: SagaCoordinator,
}

impl ExecutionService {
    pub fn new(saga: SagaCoordinator) -> Self {
        Self { saga }
    }

    pub fn saga(&self) -> &SagaCoordinator {
        &self.saga
    }

    /// Record a successful step result. Returns `true` when this step was
    /// the last one and the saga completed.
    pub fn execute_step(
        &self,
        workflow: &mut Workflow,
        step_id: &str,
        result: StepResult,
        now_ms: u64,
    ) -> Result<bool, StateError> {
        self.validate_step_execution(workflow, step_id)?;
        workflow.execute_step(step_id, result, now_ms)?;
        info!(workflow_id = %workflow.id, step_id, "step executed");

        if workflow.all_steps_completed() {
            self.saga.complete_saga(workflow, now_ms)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a step failure and decide recovery. Forward recovery stores
    /// the computed delay in the context so the scheduler can re-admit the
    /// workflow at the due time.
    pub fn handle_step_failure(
        &self,
        workflow: &mut Workflow,
        step_id: &str,
        error: WorkflowError,
        now_ms: u64,
    ) -> Result<RecoveryOutcome, StateError> {
        warn!(workflow_id = %workflow.id, step_id, error = %error, "step failed");
        workflow.handle_step_failure(step_id, error.clone(), now_ms)?;

        let retry_eligible = workflow
            .step(step_id)
            .ok_or_else(|| StateError::step_not_found(step_id))?
            .can_retry()
            && error.is_recoverable();

        if retry_eligible {
            if let Some(delay_ms) = self.saga.forward_recovery(workflow, step_id)? {
                workflow.update_context(
                    &format!("retryDelay_{step_id}"),
                    serde_json::json!(delay_ms),
                );
                workflow
                    .context
                    .set_system("retryDueAtMs", serde_json::json!(now_ms + delay_ms));
                return Ok(RecoveryOutcome::WillRetry { delay_ms });
            }
        }

        // No retry left (or the error was never retryable): fail the saga.
        // Compensation follows only when the error demands it.
        self.saga.fail_saga(workflow, error, now_ms)?;
        Ok(RecoveryOutcome::Failed {
            compensation_started: workflow.status == crate::domain::status::WorkflowStatus::Compensating,
        })
    }

    /// Start a step, or detect that a running step blew its timeout. A
    /// timeout surfaces as a recoverable error and takes the normal
    /// failure path.
    pub fn execute_step_with_timeout(
        &self,
        workflow: &mut Workflow,
        step_id: &str,
        now_ms: u64,
    ) -> Result<Option<RecoveryOutcome>, StateError> {
        let (status, timed_out, service_name, timeout_ms) = {
            let step = workflow
                .step(step_id)
                .ok_or_else(|| StateError::step_not_found(step_id))?;
            (
                step.status,
                step.has_timed_out(now_ms),
                step.service_name.clone(),
                step.timeout_ms,
            )
        };
        match status {
            StepStatus::Pending | StepStatus::Failed => {
                workflow.start_step(step_id, now_ms)?;
                debug!(workflow_id = %workflow.id, step_id, timeout_ms, "step started");
                Ok(None)
            }
            StepStatus::Executing if timed_out => {
                let error = WorkflowError::timeout(step_id, &service_name, timeout_ms, now_ms);
                let outcome = self.handle_step_failure(workflow, step_id, error, now_ms)?;
                Ok(Some(outcome))
            }
            _ => Ok(None),
        }
    }

    /// Next runnable step id: the table's next pending step whose
    /// definition dependencies are all in the executed log. `None` signals
    /// the caller to check `all_steps_completed`.
    pub fn next_step(&self, workflow: &Workflow, definition: &WorkflowDefinition) -> Option<String> {
        if workflow.all_steps_completed() {
            return None;
        }
        let candidate = match workflow.current_step_id.as_deref() {
            Some(current) => match workflow.step(current) {
                Some(step) if step.status == StepStatus::Pending => Some(current.to_string()),
                _ => definition
                    .next_step(Some(current))
                    .map(|d| d.step_id.clone()),
            },
            None => definition.next_step(None).map(|d| d.step_id.clone()),
        }?;

        let step = workflow.step(&candidate)?;
        if step.status != StepStatus::Pending {
            return None;
        }
        if !definition.dependencies_satisfied(&candidate, &workflow.executed_steps) {
            debug!(
                workflow_id = %workflow.id,
                step_id = %candidate,
                "dependencies not satisfied"
            );
            return None;
        }
        Some(candidate)
    }

    /// Whether the workflow may keep making forward progress.
    pub fn can_continue(&self, workflow: &Workflow, budget_ms: Option<u64>, now_ms: u64) -> bool {
        if !workflow.is_active() {
            debug!(workflow_id = %workflow.id, status = %workflow.status, "workflow not active");
            return false;
        }
        let budget = budget_ms.unwrap_or(DEFAULT_WORKFLOW_BUDGET_MS);
        if workflow.has_timed_out(budget, now_ms) {
            warn!(workflow_id = %workflow.id, budget_ms = budget, "workflow timed out");
            return false;
        }
        true
    }

    pub fn pause(
        &self,
        workflow: &mut Workflow,
        reason: Option<String>,
        now_ms: u64,
    ) -> Result<(), StateError> {
        workflow.pause(reason, now_ms)
    }

    pub fn resume(&self, workflow: &mut Workflow, now_ms: u64) -> Result<(), StateError> {
        workflow.resume(now_ms)
    }

    pub fn cancel(
        &self,
        workflow: &mut Workflow,
        reason: &str,
        now_ms: u64,
    ) -> Result<(), StateError> {
        workflow.cancel(reason, now_ms)
    }

    pub fn progress(&self, workflow: &Workflow) -> f64 {
        workflow.progress_percent()
    }

    fn validate_step_execution(
        &self,
        workflow: &Workflow,
        step_id: &str,
    ) -> Result<(), StateError> {
        if !workflow.is_active() {
            return Err(StateError::invalid(format!(
                "workflow {} is not active (status {})",
                workflow.id, workflow.status
            )));
        }
        let step = workflow
            .step(step_id)
            .ok_or_else(|| StateError::step_not_found(step_id))?;
        if step.is_terminal() {
            return Err(StateError::invalid(format!(
                "step {} is already terminal ({})",
                step_id, step.status
            )));
        }
        Ok(())
    }
}
