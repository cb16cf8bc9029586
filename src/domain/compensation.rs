//! Compensation descriptors for backward recovery.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_COMPENSATION_RETRIES: u32 = 3;
const DEFAULT_COMPENSATION_TIMEOUT_MS: u64 = 5_000;

/// How a completed step's effect is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStrategy {
    /// Invoke an operation that reverses the original one.
    ReverseOperation,
    /// Delete resources the step created.
    DeleteCreated,
    /// Restore state captured before the step ran.
    RestoreState,
    /// Service-specific compensation logic.
    Custom,
}

/// Describes the remote call that undoes one completed step.
///
/// Attached to a step at definition time; executed (via the remote-call
/// port) during backward recovery, in reverse order of successful
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    pub action_id: String,
    pub step_id: String,
    pub service_name: String,
    pub operation: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub strategy: CompensationStrategy,
    /// Idempotent actions may be re-invoked safely after partial failures.
    pub idempotent: bool,
    /// Retry bound for the compensation call itself.
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl CompensationAction {
    /// Reverse-operation compensation with default bounds.
    pub fn reverse_operation(
        step_id: &str,
        service_name: &str,
        operation: &str,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            action_id: format!("comp-{step_id}"),
            step_id: step_id.to_string(),
            service_name: service_name.to_string(),
            operation: operation.to_string(),
            parameters,
            strategy: CompensationStrategy::ReverseOperation,
            idempotent: true,
            max_retries: DEFAULT_COMPENSATION_RETRIES,
            timeout_ms: DEFAULT_COMPENSATION_TIMEOUT_MS,
        }
    }

    /// Delete-created compensation targeting a single resource.
    pub fn delete_created(step_id: &str, service_name: &str, resource_id: &str) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert(
            "resourceId".to_string(),
            serde_json::Value::String(resource_id.to_string()),
        );
        Self {
            action_id: format!("comp-{step_id}"),
            step_id: step_id.to_string(),
            service_name: service_name.to_string(),
            operation: "delete".to_string(),
            parameters,
            strategy: CompensationStrategy::DeleteCreated,
            idempotent: true,
            max_retries: DEFAULT_COMPENSATION_RETRIES,
            timeout_ms: DEFAULT_COMPENSATION_TIMEOUT_MS,
        }
    }

    /// Restore-state compensation carrying the captured prior state.
    pub fn restore_state(
        step_id: &str,
        service_name: &str,
        previous_state: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            action_id: format!("comp-{step_id}"),
            step_id: step_id.to_string(),
            service_name: service_name.to_string(),
            operation: "restore".to_string(),
            parameters: previous_state,
            strategy: CompensationStrategy::RestoreState,
            idempotent: true,
            max_retries: DEFAULT_COMPENSATION_RETRIES,
            timeout_ms: DEFAULT_COMPENSATION_TIMEOUT_MS,
        }
    }

    /// An action is executable when all its addressing fields are present.
    pub fn is_valid(&self) -> bool {
        !self.action_id.trim().is_empty()
            && !self.step_id.trim().is_empty()
            && !self.service_name.trim().is_empty()
            && !self.operation.trim().is_empty()
    }
}
