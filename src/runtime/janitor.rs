//! Janitor sweep.
//!
//! Periodically walks the active workflows and enforces the two timeout
//! rules the execution path cannot observe on its own:
//!
//! - a workflow running past the wall-clock budget is cancelled with
//!   reason "timeout";
//! - a step executing past its per-step budget has a recoverable timeout
//!   error synthesized for it, taking the normal failure path (retry or
//!   saga failure).
//!
//! Workflows locked by another worker are skipped; they are making
//! progress elsewhere.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::domain::status::{StepStatus, WorkflowStatus};

use super::Runtime;

pub(crate) async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let interval_ms = runtime.options().janitor_interval_ms;
    let budget_ms = runtime.options().workflow_budget_ms;
    info!(interval_ms, budget_ms, "janitor started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("janitor stopping");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
        }

        let active = match runtime.store().find_active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "failed to query active workflows");
                continue;
            }
        };
        let now = runtime.clock().now_ms();

        for workflow in active {
            if workflow.status != WorkflowStatus::Executing {
                continue;
            }

            if workflow.has_timed_out(budget_ms, now) {
                info!(workflow_id = %workflow.id, budget_ms, "workflow exceeded budget; cancelling");
                match runtime.client().cancel_workflow(&workflow.id, "timeout").await {
                    Ok(()) => {}
                    Err(ClientError::LockUnavailable { .. }) => {
                        debug!(workflow_id = %workflow.id, "skipped cancel: lock held elsewhere");
                    }
                    Err(e) => warn!(workflow_id = %workflow.id, error = %e, "cancel failed"),
                }
                continue;
            }

            // Surface per-step timeouts as recoverable errors.
            let timed_out_steps: Vec<String> = workflow
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Executing && s.has_timed_out(now))
                .map(|s| s.step_id.clone())
                .collect();
            for step_id in timed_out_steps {
                debug!(workflow_id = %workflow.id, step_id = %step_id, "step timed out");
                match runtime.client().start_step(&workflow.id, &step_id).await {
                    Ok(outcome) => {
                        debug!(workflow_id = %workflow.id, step_id = %step_id, ?outcome, "timeout handled");
                    }
                    Err(ClientError::LockUnavailable { .. }) => {
                        debug!(workflow_id = %workflow.id, "skipped timeout check: lock held elsewhere");
                    }
                    Err(e) => {
                        warn!(workflow_id = %workflow.id, step_id = %step_id, error = %e, "timeout handling failed");
                    }
                }
            }
        }
    }
}
