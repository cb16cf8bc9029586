//! Domain events emitted by the workflow aggregate.
//!
//! Events accumulate in the aggregate's pending queue (the outbox) while a
//! mutation runs and are published only after the persisted write commits.
//! Delivery is at-least-once; every event carries an immutable unique id so
//! consumers can deduplicate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::WorkflowError;
use super::result::StepResult;
use super::status::WorkflowType;

/// Event envelope: common metadata plus a type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event id (consumers deduplicate on this).
    pub event_id: String,
    /// Event type name, matching the `kind` tag.
    pub event_type: String,
    pub occurred_at_ms: u64,
    /// Workflow id (or "system" for load events).
    pub aggregate_id: String,
    /// Workflow version at emission time.
    pub version: u64,
    #[serde(flatten)]
    pub kind: DomainEventKind,
}

/// Type-specific event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEventKind {
    #[serde(rename = "WorkflowStarted")]
    WorkflowStarted {
        definition_id: String,
        workflow_type: WorkflowType,
        correlation_id: String,
        started_at_ms: u64,
    },

    #[serde(rename = "WorkflowStepExecuted")]
    WorkflowStepExecuted {
        step_id: String,
        step_name: String,
        result: StepResult,
        executed_at_ms: u64,
    },

    #[serde(rename = "WorkflowStepFailed")]
    WorkflowStepFailed {
        step_id: String,
        step_name: String,
        error: WorkflowError,
        will_retry: bool,
        retry_count: u32,
        failed_at_ms: u64,
    },

    #[serde(rename = "WorkflowFailed")]
    WorkflowFailed {
        error: WorkflowError,
        failed_step_id: Option<String>,
        failed_at_ms: u64,
        compensation_required: bool,
    },

    #[serde(rename = "WorkflowCompleted")]
    WorkflowCompleted {
        completed_at_ms: u64,
        duration_ms: u64,
        total_steps: usize,
        outputs: HashMap<String, serde_json::Value>,
    },

    #[serde(rename = "WorkflowPaused")]
    WorkflowPaused {
        paused_at_ms: u64,
        current_step_id: Option<String>,
        reason: Option<String>,
    },

    #[serde(rename = "WorkflowResumed")]
    WorkflowResumed {
        resumed_at_ms: u64,
        resume_from_step_id: Option<String>,
    },

    #[serde(rename = "WorkflowCancelled")]
    WorkflowCancelled { reason: String, cancelled_at_ms: u64 },

    #[serde(rename = "WorkflowRetry")]
    WorkflowRetry { retry_count: u32, retried_at_ms: u64 },

    #[serde(rename = "WorkflowCompensationStarted")]
    WorkflowCompensationStarted {
        steps_to_compensate: Vec<String>,
        started_at_ms: u64,
        reason: Option<String>,
    },

    #[serde(rename = "WorkflowCompensationCompleted")]
    WorkflowCompensationCompleted {
        compensated_steps: Vec<String>,
        successful: bool,
        completed_at_ms: u64,
        error: Option<String>,
    },

    #[serde(rename = "WavelessProcessingEnabled")]
    WavelessProcessingEnabled {
        batch_size: u32,
        interval_ms: u64,
        enabled_at_ms: u64,
    },

    #[serde(rename = "SystemLoadRebalanced")]
    SystemLoadRebalanced {
        service_id: String,
        previous_load: f64,
        current_load: f64,
        service_loads: HashMap<String, f64>,
        rebalanced_at_ms: u64,
        reason: Option<String>,
    },
}

impl DomainEventKind {
    /// Stable type name used for routing and the envelope `event_type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "WorkflowStarted",
            Self::WorkflowStepExecuted { .. } => "WorkflowStepExecuted",
            Self::WorkflowStepFailed { .. } => "WorkflowStepFailed",
            Self::WorkflowFailed { .. } => "WorkflowFailed",
            Self::WorkflowCompleted { .. } => "WorkflowCompleted",
            Self::WorkflowPaused { .. } => "WorkflowPaused",
            Self::WorkflowResumed { .. } => "WorkflowResumed",
            Self::WorkflowCancelled { .. } => "WorkflowCancelled",
            Self::WorkflowRetry { .. } => "WorkflowRetry",
            Self::WorkflowCompensationStarted { .. } => "WorkflowCompensationStarted",
            Self::WorkflowCompensationCompleted { .. } => "WorkflowCompensationCompleted",
            Self::WavelessProcessingEnabled { .. } => "WavelessProcessingEnabled",
            Self::SystemLoadRebalanced { .. } => "SystemLoadRebalanced",
        }
    }

    /// Terminal events end the workflow's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
                | Self::WorkflowCompensationCompleted { .. }
        )
    }
}

impl DomainEvent {
    /// Create a new event with a fresh unique id.
    pub fn new(aggregate_id: &str, version: u64, now_ms: u64, kind: DomainEventKind) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: kind.type_name().to_string(),
            occurred_at_ms: now_ms,
            aggregate_id: aggregate_id.to_string(),
            version,
            kind,
        }
    }
}
