//! The workflow aggregate.
//!
//! A `Workflow` owns its ordered step table, execution logs, error log and
//! pending-event queue outright; the coordinator, execution service and
//! schedulers mutate it only through the methods here, always under the
//! per-workflow lock. Methods enforce the status state machine and return
//! [`StateError`] on precondition violations without mutating anything.
//!
//! The aggregate performs no I/O. Mutating operations take the current
//! time explicitly (callers read it from the clock port), and events are
//! appended to an internal queue which the caller drains with
//! [`Workflow::take_events`] after the persisted write commits.

use std::collections::HashMap;

use super::context::ExecutionContext;
use super::definition::WorkflowDefinition;
use super::error::{StateError, WorkflowError};
use super::event::{DomainEvent, DomainEventKind};
use super::result::StepResult;
use super::status::{StepStatus, WorkflowPriority, WorkflowStatus, WorkflowType};
use super::step::StepExecution;

pub const DEFAULT_WORKFLOW_MAX_RETRIES: u32 = 3;

/// Root entity for one running business process.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub definition_id: String,
    pub name: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub context: ExecutionContext,
    /// Ordered step table; order equals execution order.
    pub steps: Vec<StepExecution>,
    /// Append-only log of successfully executed step ids.
    pub executed_steps: Vec<String>,
    /// Append-only log of compensated step ids (reverse executed order).
    pub compensated_steps: Vec<String>,
    pub current_step_id: Option<String>,
    pub priority: WorkflowPriority,
    pub triggered_by: Option<String>,
    pub correlation_id: String,
    pub input_parameters: HashMap<String, serde_json::Value>,
    pub output_parameters: HashMap<String, serde_json::Value>,
    pub errors: Vec<WorkflowError>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    /// Optimistic-concurrency version; bumped by the store on save.
    pub version: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pending_events: Vec<DomainEvent>,
}

impl Workflow {
    /// Create a PENDING workflow from a definition template.
    #[allow(clippy::too_many_arguments)]
    pub fn from_definition(
        id: &str,
        definition: &WorkflowDefinition,
        priority: WorkflowPriority,
        triggered_by: Option<String>,
        correlation_id: &str,
        input_parameters: HashMap<String, serde_json::Value>,
        max_retries: Option<u32>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            definition_id: definition.definition_id.clone(),
            name: definition.name.clone(),
            workflow_type: definition.workflow_type,
            status: WorkflowStatus::Pending,
            context: ExecutionContext::new(),
            steps: definition.instantiate_steps(),
            executed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            current_step_id: None,
            priority,
            triggered_by,
            correlation_id: correlation_id.to_string(),
            input_parameters,
            output_parameters: HashMap::new(),
            errors: Vec::new(),
            retry_count: 0,
            max_retries: max_retries
                .or(definition.max_retries)
                .unwrap_or(DEFAULT_WORKFLOW_MAX_RETRIES),
            started_at_ms: None,
            completed_at_ms: None,
            version: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            pending_events: Vec::new(),
        }
    }

    /// Reassemble an aggregate from persisted parts. Used by the record
    /// mapper; performs no validation beyond what the types enforce.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        definition_id: String,
        name: String,
        workflow_type: WorkflowType,
        status: WorkflowStatus,
        context: ExecutionContext,
        steps: Vec<StepExecution>,
        executed_steps: Vec<String>,
        compensated_steps: Vec<String>,
        current_step_id: Option<String>,
        priority: WorkflowPriority,
        triggered_by: Option<String>,
        correlation_id: String,
        input_parameters: HashMap<String, serde_json::Value>,
        output_parameters: HashMap<String, serde_json::Value>,
        errors: Vec<WorkflowError>,
        retry_count: u32,
        max_retries: u32,
        started_at_ms: Option<u64>,
        completed_at_ms: Option<u64>,
        version: u64,
        created_at_ms: u64,
        updated_at_ms: u64,
    ) -> Self {
        Self {
            id,
            definition_id,
            name,
            workflow_type,
            status,
            context,
            steps,
            executed_steps,
            compensated_steps,
            current_step_id,
            priority,
            triggered_by,
            correlation_id,
            input_parameters,
            output_parameters,
            errors,
            retry_count,
            max_retries,
            started_at_ms,
            completed_at_ms,
            version,
            created_at_ms,
            updated_at_ms,
            pending_events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Step table access
    // ------------------------------------------------------------------

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    fn step_mut(&mut self, step_id: &str) -> Result<&mut StepExecution, StateError> {
        self.steps
            .iter_mut()
            .find(|s| s.step_id == step_id)
            .ok_or_else(|| StateError::step_not_found(step_id))
    }

    /// Next step id in table order after `step_id`, if any.
    fn next_step_in_table(&self, step_id: &str) -> Option<String> {
        let order = self.step(step_id)?.execution_order;
        self.steps
            .iter()
            .find(|s| s.execution_order == order + 1)
            .map(|s| s.step_id.clone())
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Start workflow execution. PENDING -> EXECUTING.
    pub fn start(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Pending {
            return Err(StateError::invalid(format!(
                "workflow {} can only be started from PENDING, was {}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Executing;
        self.started_at_ms = Some(now_ms);
        self.retry_count = 0;
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowStarted {
                definition_id: self.definition_id.clone(),
                workflow_type: self.workflow_type,
                correlation_id: self.correlation_id.clone(),
                started_at_ms: now_ms,
            },
            now_ms,
        );
        Ok(())
    }

    /// Begin executing a specific step and make it current.
    pub fn start_step(&mut self, step_id: &str, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "cannot start step while workflow {} is {}",
                self.id, self.status
            )));
        }
        self.step_mut(step_id)?.start(now_ms)?;
        self.current_step_id = Some(step_id.to_string());
        self.touch(now_ms);
        Ok(())
    }

    /// Record a successful step result, append to the executed log and
    /// advance the current-step pointer.
    pub fn execute_step(
        &mut self,
        step_id: &str,
        result: StepResult,
        now_ms: u64,
    ) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "cannot execute step while workflow {} is {}",
                self.id, self.status
            )));
        }
        let step_name = {
            let step = self.step_mut(step_id)?;
            step.mark_completed(result.clone(), now_ms)?;
            step.step_name.clone()
        };
        self.executed_steps.push(step_id.to_string());
        self.current_step_id = self.next_step_in_table(step_id);
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowStepExecuted {
                step_id: step_id.to_string(),
                step_name,
                result,
                executed_at_ms: now_ms,
            },
            now_ms,
        );
        Ok(())
    }

    /// Record a step failure. Emits `WorkflowStepFailed`; when the step is
    /// out of retries and the error is non-recoverable, fails the whole
    /// workflow (which emits `WorkflowFailed`).
    pub fn handle_step_failure(
        &mut self,
        step_id: &str,
        error: WorkflowError,
        now_ms: u64,
    ) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "cannot fail step while workflow {} is {}",
                self.id, self.status
            )));
        }
        // Retry wins only while budget remains AND the error is recoverable;
        // a non-recoverable error goes straight to the failure path.
        let (step_name, will_retry, retry_count) = {
            let step = self.step_mut(step_id)?;
            step.mark_failed(error.clone(), now_ms)?;
            (
                step.step_name.clone(),
                step.can_retry() && error.is_recoverable(),
                step.retry_count,
            )
        };
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowStepFailed {
                step_id: step_id.to_string(),
                step_name,
                error: error.clone(),
                will_retry,
                retry_count,
                failed_at_ms: now_ms,
            },
            now_ms,
        );
        if !will_retry && !error.is_recoverable() {
            self.fail(error, now_ms)?;
        }
        Ok(())
    }

    /// Reset a failed step for re-admission by the scheduler.
    pub fn retry_step(&mut self, step_id: &str) -> Result<(), StateError> {
        self.step_mut(step_id)?.retry()
    }

    /// Fail the workflow. EXECUTING -> FAILED.
    pub fn fail(&mut self, error: WorkflowError, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "workflow {} can only fail from EXECUTING, was {}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Failed;
        self.completed_at_ms = Some(now_ms);
        self.touch(now_ms);
        let compensation_required = error.requires_compensation();
        let failed_step_id = error.step_id.clone();
        self.errors.push(error.clone());
        self.emit(
            DomainEventKind::WorkflowFailed {
                error,
                failed_step_id,
                failed_at_ms: now_ms,
                compensation_required,
            },
            now_ms,
        );
        Ok(())
    }

    /// Complete the workflow. EXECUTING -> COMPLETED.
    pub fn complete(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "cannot complete workflow {} that is {}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Completed;
        self.completed_at_ms = Some(now_ms);
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowCompleted {
                completed_at_ms: now_ms,
                duration_ms: self.duration_ms().unwrap_or(0),
                total_steps: self.steps.len(),
                outputs: self.output_parameters.clone(),
            },
            now_ms,
        );
        Ok(())
    }

    /// Begin backward recovery. FAILED | COMPENSATING -> COMPENSATING.
    ///
    /// The emitted event carries a reversed copy of the executed log; the
    /// log itself stays append-only.
    pub fn compensate(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Failed && self.status != WorkflowStatus::Compensating {
            return Err(StateError::invalid(format!(
                "workflow {} can only compensate from FAILED or COMPENSATING, was {}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Compensating;
        self.touch(now_ms);
        let mut steps_to_compensate = self.executed_steps.clone();
        steps_to_compensate.reverse();
        let reason = self.errors.last().map(|e| e.message.clone());
        self.emit(
            DomainEventKind::WorkflowCompensationStarted {
                steps_to_compensate,
                started_at_ms: now_ms,
                reason,
            },
            now_ms,
        );
        Ok(())
    }

    /// Begin compensating one completed step.
    pub fn compensate_step(&mut self, step_id: &str) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Compensating {
            return Err(StateError::invalid(format!(
                "cannot compensate step while workflow {} is {}",
                self.id, self.status
            )));
        }
        self.step_mut(step_id)?.compensate()
    }

    /// Record that one step's compensation finished. Idempotent for steps
    /// already COMPENSATED (no duplicate log entry).
    pub fn mark_step_compensated(&mut self, step_id: &str, now_ms: u64) -> Result<(), StateError> {
        let already = {
            let step = self.step_mut(step_id)?;
            if step.status == StepStatus::Compensated {
                true
            } else {
                step.mark_compensated(now_ms)?;
                false
            }
        };
        if !already {
            self.compensated_steps.push(step_id.to_string());
            self.touch(now_ms);
        }
        Ok(())
    }

    /// Finish backward recovery successfully. COMPENSATING -> COMPENSATED.
    pub fn complete_compensation(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Compensating {
            return Err(StateError::invalid(format!(
                "workflow {} is not compensating ({})",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Compensated;
        self.completed_at_ms = Some(now_ms);
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowCompensationCompleted {
                compensated_steps: self.compensated_steps.clone(),
                successful: true,
                completed_at_ms: now_ms,
                error: None,
            },
            now_ms,
        );
        Ok(())
    }

    /// Finish backward recovery after a partial failure. Still terminal:
    /// COMPENSATING -> COMPENSATED with `successful = false`; operators
    /// reconcile the remainder out of band.
    pub fn fail_compensation(&mut self, message: &str, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Compensating {
            return Err(StateError::invalid(format!(
                "workflow {} is not compensating ({})",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Compensated;
        self.completed_at_ms = Some(now_ms);
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowCompensationCompleted {
                compensated_steps: self.compensated_steps.clone(),
                successful: false,
                completed_at_ms: now_ms,
                error: Some(message.to_string()),
            },
            now_ms,
        );
        Ok(())
    }

    /// Retry the whole workflow after a failure. FAILED -> EXECUTING while
    /// the retry budget lasts; clears the error log.
    pub fn retry(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Failed {
            return Err(StateError::invalid(format!(
                "workflow {} can only be retried from FAILED, was {}",
                self.id, self.status
            )));
        }
        if self.retry_count >= self.max_retries {
            return Err(StateError::invalid(format!(
                "workflow {} exceeded maximum retries ({})",
                self.id, self.max_retries
            )));
        }
        self.retry_count += 1;
        self.status = WorkflowStatus::Executing;
        self.completed_at_ms = None;
        self.errors.clear();
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowRetry {
                retry_count: self.retry_count,
                retried_at_ms: now_ms,
            },
            now_ms,
        );
        Ok(())
    }

    /// Pause execution. EXECUTING -> PAUSED.
    pub fn pause(&mut self, reason: Option<String>, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Executing {
            return Err(StateError::invalid(format!(
                "can only pause executing workflows ({} is {})",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Paused;
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowPaused {
                paused_at_ms: now_ms,
                current_step_id: self.current_step_id.clone(),
                reason,
            },
            now_ms,
        );
        Ok(())
    }

    /// Resume execution. PAUSED -> EXECUTING.
    pub fn resume(&mut self, now_ms: u64) -> Result<(), StateError> {
        if self.status != WorkflowStatus::Paused {
            return Err(StateError::invalid(format!(
                "can only resume paused workflows ({} is {})",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Executing;
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowResumed {
                resumed_at_ms: now_ms,
                resume_from_step_id: self.current_step_id.clone(),
            },
            now_ms,
        );
        Ok(())
    }

    /// Cancel the workflow. Legal from any non-terminal state; terminal
    /// statuses reject. Cancel wins races against concurrent progress:
    /// later step mutations observe CANCELLED and fail.
    pub fn cancel(&mut self, reason: &str, now_ms: u64) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::invalid(format!(
                "cannot cancel workflow {} in terminal state {}",
                self.id, self.status
            )));
        }
        self.status = WorkflowStatus::Cancelled;
        self.completed_at_ms = Some(now_ms);
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WorkflowCancelled {
                reason: reason.to_string(),
                cancelled_at_ms: now_ms,
            },
            now_ms,
        );
        Ok(())
    }

    /// Set a context variable.
    pub fn update_context(&mut self, key: &str, value: serde_json::Value) {
        self.context.set(key, value);
    }

    // ------------------------------------------------------------------
    // Waveless
    // ------------------------------------------------------------------

    /// A workflow may switch to waveless processing while it is executing,
    /// high priority, and of a type that supports continuous flow.
    pub fn can_transition_to_waveless(&self) -> bool {
        self.workflow_type.supports_waveless()
            && self.status == WorkflowStatus::Executing
            && self.priority == WorkflowPriority::High
    }

    /// Record waveless configuration and announce the transition.
    pub fn transition_to_waveless(
        &mut self,
        batch_size: u32,
        interval_ms: u64,
        now_ms: u64,
    ) -> Result<(), StateError> {
        if !self.can_transition_to_waveless() {
            return Err(StateError::invalid(format!(
                "workflow {} cannot transition to waveless (type {:?}, status {}, priority {:?})",
                self.id, self.workflow_type, self.status, self.priority
            )));
        }
        self.update_context("wavelessEnabled", serde_json::Value::Bool(true));
        self.update_context("batchSize", serde_json::json!(batch_size));
        self.update_context("processingIntervalMs", serde_json::json!(interval_ms));
        self.touch(now_ms);
        self.emit(
            DomainEventKind::WavelessProcessingEnabled {
                batch_size,
                interval_ms,
                enabled_at_ms: now_ms,
            },
            now_ms,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Share of steps currently executing, 0..100.
    pub fn utilization_percent(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let executing = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Executing)
            .count();
        executing as f64 / self.steps.len() as f64 * 100.0
    }

    /// Share of steps completed or skipped, 0..100.
    pub fn progress_percent(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let done = self
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
            .count();
        done as f64 / self.steps.len() as f64 * 100.0
    }

    /// Whether the workflow has run past a wall-clock limit.
    pub fn has_timed_out(&self, limit_ms: u64, now_ms: u64) -> bool {
        match self.started_at_ms {
            Some(started) if !self.status.is_terminal() => {
                now_ms.saturating_sub(started) > limit_ms
            }
            _ => false,
        }
    }

    /// Steps needing compensation, in strict reverse executed order.
    pub fn steps_requiring_compensation(&self) -> Vec<&StepExecution> {
        self.executed_steps
            .iter()
            .rev()
            .filter_map(|id| self.step(id))
            .filter(|s| s.requires_compensation())
            .collect()
    }

    /// All steps finished (completed or skipped). Empty tables never count
    /// as complete.
    pub fn all_steps_completed(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.completed_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    /// Drain the pending event queue. Callers publish the returned events
    /// only after the persisted write commits.
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Events queued since the last drain.
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    fn emit(&mut self, kind: DomainEventKind, now_ms: u64) {
        self.pending_events
            .push(DomainEvent::new(&self.id, self.version, now_ms, kind));
    }

    fn touch(&mut self, now_ms: u64) {
        self.updated_at_ms = now_ms;
    }
}
