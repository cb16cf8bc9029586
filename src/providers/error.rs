//! Error types for the provider ports.

use std::fmt;

use crate::domain::error::{ErrorKind, WorkflowError};

/// Workflow store failure.
///
/// `VersionConflict` is the optimistic-lock miss: the caller reloads,
/// re-applies its mutation and saves again. The other variants classify
/// backend failures by retryability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stored version differs from the version the caller loaded.
    VersionConflict {
        workflow_id: String,
        expected: u64,
        actual: u64,
    },
    /// The workflow does not exist.
    NotFound { workflow_id: String },
    /// Backend failure with retry classification.
    Backend {
        operation: String,
        message: String,
        retryable: bool,
    },
}

impl StoreError {
    pub fn backend_retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn backend_permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::VersionConflict { .. } => true,
            StoreError::NotFound { .. } => false,
            StoreError::Backend { retryable, .. } => *retryable,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::VersionConflict {
                workflow_id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on workflow {workflow_id}: expected {expected}, stored {actual}"
            ),
            StoreError::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            StoreError::Backend {
                operation, message, ..
            } => write!(f, "{operation}: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Lock store failure. Failing to *win* a lock is not an error (the
/// acquire call returns `false`); this covers backend trouble only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockError {
    pub operation: String,
    pub message: String,
}

impl LockError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock {}: {}", self.operation, self.message)
    }
}

impl std::error::Error for LockError {}

/// Event publication failure. Publication happens after commit; callers
/// log and rely on at-least-once redelivery rather than roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    pub message: String,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event publish failed: {}", self.message)
    }
}

impl std::error::Error for PublishError {}

/// Remote call failure, as classified by the RPC port.
///
/// Timeout, unavailability and remote faults are recoverable step errors;
/// validation rejections are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Timeout {
        service: String,
        operation: String,
    },
    Unavailable {
        service: String,
        message: String,
    },
    Remote {
        service: String,
        code: String,
        message: String,
    },
    Validation {
        service: String,
        message: String,
    },
}

impl CallError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CallError::Validation { .. })
    }

    pub fn service(&self) -> &str {
        match self {
            CallError::Timeout { service, .. }
            | CallError::Unavailable { service, .. }
            | CallError::Remote { service, .. }
            | CallError::Validation { service, .. } => service,
        }
    }

    /// Convert into the recorded domain error for a step.
    pub fn to_workflow_error(&self, step_id: &str, now_ms: u64) -> WorkflowError {
        let (kind, code, message) = match self {
            CallError::Timeout { operation, .. } => (
                ErrorKind::Timeout,
                "TIMEOUT".to_string(),
                format!("remote call {operation} timed out"),
            ),
            CallError::Unavailable { message, .. } => (
                ErrorKind::ServiceUnavailable,
                "SERVICE_UNAVAILABLE".to_string(),
                message.clone(),
            ),
            CallError::Remote { code, message, .. } => {
                (ErrorKind::Network, code.clone(), message.clone())
            }
            CallError::Validation { message, .. } => (
                ErrorKind::Validation,
                "VALIDATION".to_string(),
                message.clone(),
            ),
        };
        WorkflowError::new(
            kind,
            code,
            message,
            Some(step_id.to_string()),
            Some(self.service().to_string()),
            self.is_recoverable(),
            now_ms,
        )
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout { service, operation } => {
                write!(f, "call to {service}/{operation} timed out")
            }
            CallError::Unavailable { service, message } => {
                write!(f, "{service} unavailable: {message}")
            }
            CallError::Remote {
                service,
                code,
                message,
            } => write!(f, "{service} returned {code}: {message}"),
            CallError::Validation { service, message } => {
                write!(f, "{service} rejected request: {message}")
            }
        }
    }
}

impl std::error::Error for CallError {}
