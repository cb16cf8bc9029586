//! Persisted representation of the workflow aggregate.
//!
//! The store persists plain records, not the behavioral aggregate: the
//! document layout (step table keyed by id, executed/compensated logs as
//! arrays, flat metadata) is described here and mapped losslessly to and
//! from [`Workflow`] at the repository boundary. Round-tripping a workflow
//! through its record yields an observationally equal aggregate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::compensation::CompensationAction;
use crate::domain::context::ExecutionContext;
use crate::domain::error::WorkflowError;
use crate::domain::result::StepResult;
use crate::domain::retry::RetryPolicy;
use crate::domain::status::{StepStatus, WorkflowPriority, WorkflowStatus, WorkflowType};
use crate::domain::step::StepExecution;
use crate::domain::workflow::Workflow;

/// Persisted form of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub service_name: String,
    pub operation: String,
    pub execution_order: u32,
    pub status: StepStatus,
    pub input: HashMap<String, serde_json::Value>,
    pub output: HashMap<String, serde_json::Value>,
    pub result: Option<StepResult>,
    pub error: Option<WorkflowError>,
    pub retry_policy: RetryPolicy,
    pub retry_count: u32,
    pub retries_remaining: u32,
    pub compensation: Option<CompensationAction>,
    pub timeout_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub compensated: bool,
    pub compensated_at_ms: Option<u64>,
}

impl StepRecord {
    pub fn from_step(step: &StepExecution) -> Self {
        Self {
            step_id: step.step_id.clone(),
            step_name: step.step_name.clone(),
            step_type: step.step_type.clone(),
            service_name: step.service_name.clone(),
            operation: step.operation.clone(),
            execution_order: step.execution_order,
            status: step.status,
            input: step.input.clone(),
            output: step.output.clone(),
            result: step.result.clone(),
            error: step.error.clone(),
            retry_policy: step.retry_policy.clone(),
            retry_count: step.retry_count,
            retries_remaining: step.retries_remaining,
            compensation: step.compensation.clone(),
            timeout_ms: step.timeout_ms,
            started_at_ms: step.started_at_ms,
            completed_at_ms: step.completed_at_ms,
            compensated: step.compensated,
            compensated_at_ms: step.compensated_at_ms,
        }
    }

    pub fn into_step(self) -> StepExecution {
        StepExecution {
            step_id: self.step_id,
            step_name: self.step_name,
            step_type: self.step_type,
            service_name: self.service_name,
            operation: self.operation,
            execution_order: self.execution_order,
            status: self.status,
            input: self.input,
            output: self.output,
            result: self.result,
            error: self.error,
            retry_policy: self.retry_policy,
            retry_count: self.retry_count,
            retries_remaining: self.retries_remaining,
            compensation: self.compensation,
            timeout_ms: self.timeout_ms,
            started_at_ms: self.started_at_ms,
            completed_at_ms: self.completed_at_ms,
            compensated: self.compensated,
            compensated_at_ms: self.compensated_at_ms,
        }
    }
}

/// Persisted form of a workflow instance.
///
/// Indexed by status, type, correlation id, started-at and priority in the
/// document store; the step table preserves execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub definition_id: String,
    pub name: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub context: ExecutionContext,
    pub steps: Vec<StepRecord>,
    pub executed_steps: Vec<String>,
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
    pub version: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl WorkflowRecord {
    /// Snapshot the aggregate for persistence. Pending events are the
    /// outbox, not state; they are deliberately not captured.
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id.clone(),
            definition_id: workflow.definition_id.clone(),
            name: workflow.name.clone(),
            workflow_type: workflow.workflow_type,
            status: workflow.status,
            context: workflow.context.clone(),
            steps: workflow.steps.iter().map(StepRecord::from_step).collect(),
            executed_steps: workflow.executed_steps.clone(),
            compensated_steps: workflow.compensated_steps.clone(),
            current_step_id: workflow.current_step_id.clone(),
            priority: workflow.priority,
            triggered_by: workflow.triggered_by.clone(),
            correlation_id: workflow.correlation_id.clone(),
            input_parameters: workflow.input_parameters.clone(),
            output_parameters: workflow.output_parameters.clone(),
            errors: workflow.errors.clone(),
            retry_count: workflow.retry_count,
            max_retries: workflow.max_retries,
            started_at_ms: workflow.started_at_ms,
            completed_at_ms: workflow.completed_at_ms,
            version: workflow.version,
            created_at_ms: workflow.created_at_ms,
            updated_at_ms: workflow.updated_at_ms,
        }
    }

    /// Rebuild the aggregate. The result starts with an empty pending
    /// event queue.
    pub fn into_workflow(self) -> Workflow {
        Workflow::from_parts(
            self.id,
            self.definition_id,
            self.name,
            self.workflow_type,
            self.status,
            self.context,
            self.steps.into_iter().map(StepRecord::into_step).collect(),
            self.executed_steps,
            self.compensated_steps,
            self.current_step_id,
            self.priority,
            self.triggered_by,
            self.correlation_id,
            self.input_parameters,
            self.output_parameters,
            self.errors,
            self.retry_count,
            self.max_retries,
            self.started_at_ms,
            self.completed_at_ms,
            self.version,
            self.created_at_ms,
            self.updated_at_ms,
        )
    }
}
