//! Saga coordination: forward vs. backward recovery.
//!
//! The coordinator is deterministic given the workflow state and performs
//! no I/O. It decides whether a failed step is retried (forward recovery)
//! or the workflow unwinds its completed steps in reverse (backward
//! recovery); actually invoking remote compensation calls is the
//! responsibility of the execution layer, per step.

use tracing::{debug, info, warn};

use crate::domain::error::{StateError, WorkflowError};
use crate::domain::status::{StepStatus, WorkflowStatus};
use crate::domain::workflow::Workflow;

/// Coordinates saga lifecycle transitions on a workflow aggregate.
#[derive(Debug, Clone, Default)]
pub struct SagaCoordinator;

impl SagaCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Start the saga: stamp a transaction id into the context and start
    /// the workflow.
    pub fn start_saga(&self, workflow: &mut Workflow, now_ms: u64) -> Result<(), StateError> {
        info!(workflow_id = %workflow.id, "starting saga");
        let txn_id = format!("saga-{}", uuid::Uuid::new_v4());
        workflow
            .context
            .set_system("sagaTransactionId", serde_json::Value::String(txn_id));
        workflow
            .context
            .set_system("sagaStarted", serde_json::Value::Bool(true));
        workflow.start(now_ms)
    }

    /// Forward recovery: if the failed step still has retry budget, reset
    /// it for re-admission and return the backoff delay the scheduler must
    /// honor. `None` means the caller has to switch to backward recovery.
    pub fn forward_recovery(
        &self,
        workflow: &mut Workflow,
        step_id: &str,
    ) -> Result<Option<u64>, StateError> {
        let (can_retry, delay_ms, retry_count) = {
            let step = workflow
                .step(step_id)
                .ok_or_else(|| StateError::step_not_found(step_id))?;
            (step.can_retry(), step.retry_delay_ms(), step.retry_count)
        };
        if !can_retry {
            warn!(
                workflow_id = %workflow.id,
                step_id,
                "step cannot be retried; backward recovery required"
            );
            return Ok(None);
        }
        workflow.retry_step(step_id)?;
        info!(
            workflow_id = %workflow.id,
            step_id,
            retry_count,
            delay_ms,
            "step marked for retry"
        );
        Ok(Some(delay_ms))
    }

    /// Backward recovery: move the workflow into COMPENSATING. When no
    /// executed step requires compensation the workflow passes straight
    /// through to COMPENSATED.
    pub fn backward_recovery(
        &self,
        workflow: &mut Workflow,
        error: &WorkflowError,
        now_ms: u64,
    ) -> Result<(), StateError> {
        let to_compensate = workflow.steps_requiring_compensation().len();
        if to_compensate == 0 {
            info!(workflow_id = %workflow.id, "no steps require compensation");
            workflow.compensate(now_ms)?;
            workflow.complete_compensation(now_ms)?;
            return Ok(());
        }
        info!(
            workflow_id = %workflow.id,
            steps = to_compensate,
            "executing backward recovery"
        );
        workflow.compensate(now_ms)?;
        workflow.context.set_system(
            "compensationReason",
            serde_json::Value::String(error.message.clone()),
        );
        workflow
            .context
            .set_system("stepsToCompensate", serde_json::json!(to_compensate));
        Ok(())
    }

    /// Complete the saga successfully.
    pub fn complete_saga(&self, workflow: &mut Workflow, now_ms: u64) -> Result<(), StateError> {
        info!(workflow_id = %workflow.id, "completing saga");
        workflow
            .context
            .set_system("sagaCompleted", serde_json::Value::Bool(true));
        workflow.complete(now_ms)
    }

    /// Fail the saga. Fails the workflow unless the aggregate already did,
    /// then triggers backward recovery iff the error demands it.
    pub fn fail_saga(
        &self,
        workflow: &mut Workflow,
        error: WorkflowError,
        now_ms: u64,
    ) -> Result<(), StateError> {
        warn!(workflow_id = %workflow.id, error = %error, "saga failed");
        if workflow.status == WorkflowStatus::Executing {
            workflow.fail(error.clone(), now_ms)?;
        } else if workflow.status != WorkflowStatus::Failed {
            return Err(StateError::invalid(format!(
                "cannot fail saga for workflow {} in status {}",
                workflow.id, workflow.status
            )));
        }
        if error.requires_compensation() {
            self.backward_recovery(workflow, &error, now_ms)?;
        } else {
            debug!(workflow_id = %workflow.id, "error does not require compensation");
        }
        Ok(())
    }

    /// A saga is consistent when every completed step knows how to undo
    /// itself. Exposed for admission checks.
    pub fn check_consistency(&self, workflow: &Workflow) -> bool {
        let completed_without_compensation = workflow
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed && s.compensation.is_none())
            .count();
        if completed_without_compensation > 0 {
            warn!(
                workflow_id = %workflow.id,
                count = completed_without_compensation,
                "completed steps without compensation actions"
            );
        }
        completed_without_compensation == 0
    }

    /// Compensation progress 0..100; vacuously 100 with nothing executed.
    pub fn compensation_progress(&self, workflow: &Workflow) -> f64 {
        if workflow.executed_steps.is_empty() {
            return 100.0;
        }
        workflow.compensated_steps.len() as f64 / workflow.executed_steps.len() as f64 * 100.0
    }

    /// The saga may move on when the current step completed and the
    /// workflow is still executing.
    pub fn can_proceed_to_next_step(&self, workflow: &Workflow, current_step_id: &str) -> bool {
        match workflow.step(current_step_id) {
            Some(step) => {
                step.status == StepStatus::Completed
                    && workflow.status == WorkflowStatus::Executing
            }
            None => false,
        }
    }
}
