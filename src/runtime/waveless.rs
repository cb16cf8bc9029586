//! Waveless dispatcher loop.
//!
//! On each tick the loop queries admission candidates, dispatches
//! immediate-eligible workflows straight away, builds a priority batch
//! sized to the current load for the rest, and hands each admitted
//! workflow to the client for its next step. Both the batch size and the
//! tick interval adapt continuously; an overloaded system pauses
//! admission for the tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::domain::workflow::Workflow;

use super::Runtime;

pub(crate) async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let policy = runtime.options().waveless.clone();
    let mut tick_ms = policy.default_tick_interval_ms;
    info!(tick_ms, "waveless dispatcher started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("waveless dispatcher stopping");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(tick_ms)) => {}
        }

        if runtime.balancer().should_pause_admission() {
            warn!("admission paused for this tick");
            continue;
        }

        let candidates = match runtime.store().find_for_waveless().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "failed to query waveless candidates");
                continue;
            }
        };
        let queue_depth = candidates.len();
        let now = runtime.clock().now_ms();

        // Workflows waiting out a retry backoff are not yet due.
        let (due, _waiting): (Vec<Workflow>, Vec<Workflow>) =
            candidates.into_iter().partition(|w| retry_due(w, now));

        // When targets report load, a fully saturated target set stalls
        // the tick; the definition decides the actual target per step.
        if !due.is_empty()
            && !runtime.balancer().snapshot_map().is_empty()
            && runtime.balancer().select_target().is_none()
        {
            warn!("no downstream target can accept work; yielding tick");
            continue;
        }

        let (immediate, batched): (Vec<Workflow>, Vec<Workflow>) = due
            .into_iter()
            .partition(|w| policy.should_process_immediately(w, now));

        for workflow in &immediate {
            dispatch(&runtime, &workflow.id).await;
        }

        let batch_size = policy.batch_size_for_load(runtime.balancer().max_load_score());
        let batch: Vec<String> = policy
            .build_batch(&batched, batch_size as usize)
            .into_iter()
            .map(|w| w.id.clone())
            .collect();
        if !batch.is_empty() || !immediate.is_empty() {
            debug!(
                immediate = immediate.len(),
                batch = batch.len(),
                batch_size,
                queue_depth,
                "dispatching waveless batch"
            );
        }
        for workflow_id in batch {
            dispatch(&runtime, &workflow_id).await;
        }

        tick_ms = policy.tick_interval_for_queue(queue_depth);
    }
}

/// A workflow sitting in a retry backoff is admitted only at or after its
/// due time.
fn retry_due(workflow: &Workflow, now_ms: u64) -> bool {
    match workflow
        .context
        .system("retryDueAtMs")
        .and_then(serde_json::Value::as_u64)
    {
        Some(due_at) => due_at <= now_ms,
        None => true,
    }
}

async fn dispatch(runtime: &Arc<Runtime>, workflow_id: &str) {
    match runtime.client().run_next_step(workflow_id).await {
        Ok(outcome) => {
            debug!(workflow_id, ?outcome, "dispatched workflow step");
        }
        // Another worker holds the lock; it will make progress instead.
        Err(ClientError::LockUnavailable { .. }) => {
            debug!(workflow_id, "skipped: lock held elsewhere");
        }
        Err(e) => {
            warn!(workflow_id, error = %e, "dispatch failed");
        }
    }
}
