//! Workflow templates.
//!
//! Definitions are supplied as data (the engine does not author them) and
//! drive two things: instantiation of a workflow's ordered step table, and
//! next-step routing with dependency gating during execution.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::compensation::CompensationAction;
use super::retry::RetryPolicy;
use super::status::WorkflowType;
use super::step::StepExecution;

/// One step template within a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub service_name: String,
    pub operation: String,
    /// 1-based position in the execution sequence.
    pub execution_order: u32,
    #[serde(default)]
    pub default_inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub compensation: Option<CompensationAction>,
    /// Step ids that must appear in the executed log before this step runs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Template for workflow execution: ordered steps plus shared policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub definition_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    pub version: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub default_retry_policy: Option<RetryPolicy>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    /// Validate the template: execution order must be sequential from 1 and
    /// every dependency must reference an existing step.
    pub fn validate(&self) -> bool {
        if self.definition_id.trim().is_empty() || self.name.trim().is_empty() {
            return false;
        }
        if self.steps.is_empty() {
            return false;
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|s| s.execution_order).collect();
        orders.sort_unstable();
        for (i, order) in orders.iter().enumerate() {
            if *order != i as u32 + 1 {
                return false;
            }
        }

        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        if ids.len() != self.steps.len() {
            return false;
        }
        for step in &self.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return false;
                }
            }
        }
        true
    }

    /// Next step after `current` in execution order. `None` current yields
    /// the first step; `None` result means there is nothing left.
    pub fn next_step(&self, current: Option<&str>) -> Option<&StepDefinition> {
        match current {
            None => self.steps.iter().min_by_key(|s| s.execution_order),
            Some(step_id) => {
                let current_order = self
                    .steps
                    .iter()
                    .find(|s| s.step_id == step_id)?
                    .execution_order;
                self.steps
                    .iter()
                    .find(|s| s.execution_order == current_order + 1)
            }
        }
    }

    /// Whether all of a step's dependencies appear in the executed log.
    pub fn dependencies_satisfied(&self, step_id: &str, executed: &[String]) -> bool {
        match self.steps.iter().find(|s| s.step_id == step_id) {
            Some(step) => step
                .dependencies
                .iter()
                .all(|dep| executed.iter().any(|e| e == dep)),
            None => false,
        }
    }

    /// Compensation action declared for a step, if any.
    pub fn compensation_for(&self, step_id: &str) -> Option<&CompensationAction> {
        self.steps
            .iter()
            .find(|s| s.step_id == step_id)
            .and_then(|s| s.compensation.as_ref())
    }

    /// Steps sorted by execution order.
    pub fn steps_in_order(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.execution_order);
        steps
    }

    /// Materialize the ordered step table for a new workflow instance.
    pub fn instantiate_steps(&self) -> Vec<StepExecution> {
        self.steps_in_order()
            .into_iter()
            .map(|def| {
                let mut step = StepExecution::new(
                    &def.step_id,
                    &def.step_name,
                    &def.step_type,
                    &def.service_name,
                    &def.operation,
                    def.execution_order,
                    def.default_inputs.clone(),
                    def.timeout_ms,
                );
                if let Some(policy) = def
                    .retry_policy
                    .clone()
                    .or_else(|| self.default_retry_policy.clone())
                {
                    step = step.with_retry_policy(policy);
                }
                if let Some(action) = def.compensation.clone() {
                    step = step.with_compensation(action);
                }
                step
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_def(id: &str, order: u32, deps: Vec<&str>) -> StepDefinition {
        StepDefinition {
            step_id: id.to_string(),
            step_name: id.to_string(),
            step_type: "task".to_string(),
            service_name: "svc".to_string(),
            operation: "op".to_string(),
            execution_order: order,
            default_inputs: HashMap::new(),
            timeout_ms: None,
            retry_policy: None,
            compensation: None,
            dependencies: deps.into_iter().map(String::from).collect(),
            optional: false,
        }
    }

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            definition_id: "order-fulfillment-v1".to_string(),
            name: "Order Fulfillment".to_string(),
            description: None,
            workflow_type: WorkflowType::OrderFulfillment,
            version: "1.0".to_string(),
            steps: vec![
                step_def("reserve-inventory", 1, vec![]),
                step_def("assign-robot", 2, vec!["reserve-inventory"]),
                step_def("pick-items", 3, vec!["assign-robot"]),
            ],
            timeout_ms: None,
            max_retries: None,
            default_retry_policy: None,
            active: true,
        }
    }

    #[test]
    fn valid_definition_passes() {
        assert!(definition().validate());
    }

    #[test]
    fn non_sequential_order_fails_validation() {
        let mut def = definition();
        def.steps[2].execution_order = 5;
        assert!(!def.validate());
    }

    #[test]
    fn unknown_dependency_fails_validation() {
        let mut def = definition();
        def.steps[1].dependencies = vec!["weigh-package".to_string()];
        assert!(!def.validate());
    }

    #[test]
    fn duplicate_step_ids_fail_validation() {
        let mut def = definition();
        def.steps[2].step_id = "reserve-inventory".to_string();
        assert!(!def.validate());
    }

    #[test]
    fn next_step_walks_execution_order() {
        let def = definition();
        assert_eq!(def.next_step(None).unwrap().step_id, "reserve-inventory");
        assert_eq!(
            def.next_step(Some("reserve-inventory")).unwrap().step_id,
            "assign-robot"
        );
        assert_eq!(def.next_step(Some("assign-robot")).unwrap().step_id, "pick-items");
        assert!(def.next_step(Some("pick-items")).is_none());
        assert!(def.next_step(Some("missing")).is_none());
    }

    #[test]
    fn dependency_gating() {
        let def = definition();
        assert!(def.dependencies_satisfied("reserve-inventory", &[]));
        assert!(!def.dependencies_satisfied("assign-robot", &[]));
        assert!(def.dependencies_satisfied("assign-robot", &["reserve-inventory".to_string()]));
        assert!(!def.dependencies_satisfied("missing", &[]));
    }

    #[test]
    fn instantiate_builds_ordered_pending_steps() {
        let mut def = definition();
        def.default_retry_policy = Some(RetryPolicy::aggressive());
        let steps = def.instantiate_steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].step_id, "reserve-inventory");
        assert_eq!(steps[2].step_id, "pick-items");
        // Default policy from the definition applies when the step has none.
        assert_eq!(steps[0].retry_policy.max_retries, 5);
        assert_eq!(steps[0].retries_remaining, 5);
    }
}
