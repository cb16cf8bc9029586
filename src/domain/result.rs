//! Step execution results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one step invocation against a downstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    /// Output parameters produced by the service.
    pub output: HashMap<String, serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub execution_time_ms: u64,
    pub completed_at_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl StepResult {
    pub fn success(
        step_id: &str,
        output: HashMap<String, serde_json::Value>,
        execution_time_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: true,
            output,
            error_message: None,
            error_code: None,
            execution_time_ms,
            completed_at_ms: now_ms,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(
        step_id: &str,
        error_message: &str,
        error_code: &str,
        execution_time_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: false,
            output: HashMap::new(),
            error_message: Some(error_message.to_string()),
            error_code: Some(error_code.to_string()),
            execution_time_ms,
            completed_at_ms: now_ms,
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_failure(&self) -> bool {
        !self.success
    }

    /// Output value by key, if present.
    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.output.get(key)
    }

    /// Whether the reported execution time blew the given budget.
    pub fn exceeded_timeout(&self, timeout_ms: u64) -> bool {
        self.execution_time_ms > timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_constructors() {
        let mut output = HashMap::new();
        output.insert("reservationId".to_string(), serde_json::json!("r-42"));
        let ok = StepResult::success("reserve-inventory", output, 120, 5_000);
        assert!(ok.is_success());
        assert_eq!(ok.output("reservationId"), Some(&serde_json::json!("r-42")));
        assert!(ok.error_message.is_none());

        let err = StepResult::failure("reserve-inventory", "stock short", "STOCK_SHORT", 80, 5_000);
        assert!(err.is_failure());
        assert_eq!(err.error_code.as_deref(), Some("STOCK_SHORT"));
        assert!(err.output.is_empty());
    }

    #[test]
    fn timeout_threshold() {
        let r = StepResult::success("s", HashMap::new(), 6_000, 0);
        assert!(r.exceeded_timeout(5_000));
        assert!(!r.exceeded_timeout(6_000));
    }
}
