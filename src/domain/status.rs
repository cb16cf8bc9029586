//! Status enums and workflow classification types.
//!
//! `WorkflowStatus` and `StepStatus` define the two state machines the
//! engine enforces. `WorkflowType` and `WorkflowPriority` classify
//! workflows for scheduling decisions (waveless eligibility, batch order).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow.
///
/// Transitions are enforced by the `Workflow` aggregate:
///
/// ```text
/// PENDING -> EXECUTING -> COMPLETED | PAUSED | FAILED | CANCELLED
/// PAUSED -> EXECUTING | CANCELLED
/// FAILED -> EXECUTING (retry) | COMPENSATING
/// COMPENSATING -> COMPENSATED
/// ```
///
/// COMPLETED, COMPENSATED, CANCELLED and FAILED (with no retries or
/// compensation left) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Created and persisted, not yet started.
    Pending,
    /// Steps are being driven forward.
    Executing,
    /// Execution suspended by an operator; resumable.
    Paused,
    /// All steps completed successfully.
    Completed,
    /// A non-recoverable error stopped forward progress.
    Failed,
    /// Backward recovery is undoing completed steps.
    Compensating,
    /// Backward recovery finished (fully or partially).
    Compensated,
    /// Explicitly cancelled; no further progress.
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses absorb all further mutations.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Compensated
                | WorkflowStatus::Cancelled
        )
    }

    /// Active workflows hold resources and count toward system load.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Executing | WorkflowStatus::Paused | WorkflowStatus::Compensating
        )
    }

    /// Parse the persisted SCREAMING_SNAKE_CASE form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "EXECUTING" => Some(Self::Executing),
            "PAUSED" => Some(Self::Paused),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "COMPENSATING" => Some(Self::Compensating),
            "COMPENSATED" => Some(Self::Compensated),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a single step.
///
/// ```text
/// PENDING -> EXECUTING -> COMPLETED | FAILED | SKIPPED
/// FAILED -> PENDING (retry)
/// COMPLETED -> COMPENSATING -> COMPENSATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Compensated | StepStatus::Skipped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, StepStatus::Executing | StepStatus::Compensating)
    }

    /// Only failed steps are eligible for retry.
    pub fn can_retry(&self) -> bool {
        matches!(self, StepStatus::Failed)
    }

    /// Only completed steps are eligible for compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Compensating => "COMPENSATING",
            Self::Compensated => "COMPENSATED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business process type a workflow instance executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    OrderFulfillment,
    Receiving,
    Putaway,
    Picking,
    Packing,
    Shipping,
    ReturnsProcessing,
    InventoryTransfer,
    CycleCount,
    Replenishment,
    CrossDocking,
    WaveProcessing,
    WavelessProcessing,
    QualityCheck,
    ValueAddedService,
}

impl WorkflowType {
    /// Types eligible for continuous (waveless) admission.
    pub fn supports_waveless(&self) -> bool {
        matches!(
            self,
            WorkflowType::OrderFulfillment | WorkflowType::Picking | WorkflowType::Packing
        )
    }

    /// Types whose steps reserve or move inventory.
    pub fn requires_inventory(&self) -> bool {
        matches!(
            self,
            WorkflowType::OrderFulfillment | WorkflowType::Picking | WorkflowType::Replenishment
        )
    }
}

/// Priority for batch ordering. Lower level sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPriority {
    High,
    Normal,
    Low,
}

impl WorkflowPriority {
    /// Numeric level: HIGH=1, NORMAL=2, LOW=3.
    pub fn level(&self) -> u8 {
        match self {
            WorkflowPriority::High => 1,
            WorkflowPriority::Normal => 2,
            WorkflowPriority::Low => 3,
        }
    }

    pub fn is_higher_than(&self, other: WorkflowPriority) -> bool {
        self.level() < other.level()
    }

    pub fn is_lower_than(&self, other: WorkflowPriority) -> bool {
        self.level() > other.level()
    }
}
