//! Error taxonomy for workflow execution.
//!
//! Two distinct channels exist:
//! - [`WorkflowError`] is a recorded domain value: something went wrong while
//!   executing a step against a downstream service. It flows through retry
//!   and compensation decisions and is persisted in the workflow error log.
//! - [`StateError`] signals a violated precondition on the aggregate (a
//!   caller bug). It is returned to the caller and never appears as a
//!   workflow-terminal error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a workflow error.
///
/// The kind determines default recoverability: transport-level failures
/// (service unavailable, timeout, network) are retried; everything else
/// fails the step outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    ServiceUnavailable,
    Timeout,
    BusinessRuleViolation,
    DataIntegrity,
    Network,
    PermissionDenied,
    ResourceNotFound,
    Internal,
    CompensationFailed,
}

impl ErrorKind {
    /// Whether errors of this kind are retried by default.
    pub fn default_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ServiceUnavailable | ErrorKind::Timeout | ErrorKind::Network
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            Self::DataIntegrity => "DATA_INTEGRITY",
            Self::Network => "NETWORK",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::Internal => "INTERNAL",
            Self::CompensationFailed => "COMPENSATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error observed while executing (or compensating) a step.
///
/// Recorded in the step and in the workflow error log; carried in
/// `WorkflowStepFailed` and `WorkflowFailed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    /// Unique id for correlation across logs and events.
    pub error_id: String,
    pub kind: ErrorKind,
    /// Machine-readable code from the failing service (e.g. "STOCK_SHORT").
    pub code: String,
    pub message: String,
    /// Service that produced the error, when known.
    pub service: Option<String>,
    /// Step the error occurred in, when known.
    pub step_id: Option<String>,
    pub occurred_at_ms: u64,
    /// Whether forward recovery (retry) may consume this error.
    pub recoverable: bool,
}

impl WorkflowError {
    /// Create an error with explicit recoverability.
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        step_id: Option<String>,
        service: Option<String>,
        recoverable: bool,
        now_ms: u64,
    ) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            kind,
            code: code.into(),
            message: message.into(),
            service,
            step_id,
            occurred_at_ms: now_ms,
            recoverable,
        }
    }

    /// Create an error whose recoverability follows the kind's default.
    pub fn of_kind(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        step_id: Option<String>,
        service: Option<String>,
        now_ms: u64,
    ) -> Self {
        let recoverable = kind.default_recoverable();
        Self::new(kind, code, message, step_id, service, recoverable, now_ms)
    }

    /// Synthesized recoverable timeout for a step that exceeded its budget.
    pub fn timeout(step_id: &str, service: &str, budget_ms: u64, now_ms: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            "TIMEOUT",
            format!("step execution exceeded timeout of {budget_ms} ms"),
            Some(step_id.to_string()),
            Some(service.to_string()),
            true,
            now_ms,
        )
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Non-recoverable errors trigger backward recovery, except validation
    /// failures: bad input never produced downstream effects to undo.
    pub fn requires_compensation(&self) -> bool {
        !self.recoverable && self.kind != ErrorKind::Validation
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.kind, self.code, self.message)?;
        if let Some(step) = &self.step_id {
            write!(f, " (step {step})")?;
        }
        Ok(())
    }
}

/// Precondition violation on the workflow aggregate or a step.
///
/// These indicate a caller bug (driving an operation from the wrong state)
/// and are surfaced, never suppressed or logged into the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not legal from the current state.
    InvalidState { message: String },
    /// The referenced step does not exist in the workflow's step table.
    StepNotFound { step_id: String },
}

impl StateError {
    pub fn invalid(message: impl Into<String>) -> Self {
        StateError::InvalidState {
            message: message.into(),
        }
    }

    pub fn step_not_found(step_id: impl Into<String>) -> Self {
        StateError::StepNotFound {
            step_id: step_id.into(),
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::InvalidState { message } => write!(f, "invalid state: {message}"),
            StateError::StepNotFound { step_id } => write!(f, "step not found: {step_id}"),
        }
    }
}

impl std::error::Error for StateError {}
