//! Load monitor loop.
//!
//! Periodically folds the engine's own utilization into the balancer's
//! load map and, when the balancer detects imbalance, computes fresh
//! per-service targets and announces the decision with a
//! `SystemLoadRebalanced` event. The scheduler applies the targets when
//! placing future admissions; nothing is moved here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::event::{DomainEvent, DomainEventKind};
use crate::domain::load::LoadSnapshot;

use super::Runtime;

/// Service id under which the engine reports its own load.
const ENGINE_SERVICE_ID: &str = "orchestration-engine";

pub(crate) async fn run(runtime: Arc<Runtime>, mut shutdown: watch::Receiver<bool>) {
    let interval_ms = runtime.options().monitor_interval_ms;
    let mut previous_score = 0.0_f64;
    info!(interval_ms, "load monitor started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("load monitor stopping");
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

        // Engine utilization: average share of concurrently executing
        // steps across active workflows, plus queue depth from pending
        // admissions.
        let utilization = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|w| w.utilization_percent()).sum::<f64>() / active.len() as f64
        };
        let queue_depth = runtime
            .store()
            .count_by_status(crate::domain::status::WorkflowStatus::Pending)
            .await
            .unwrap_or(0) as u32;
        let snapshot = LoadSnapshot::new(
            ENGINE_SERVICE_ID,
            ENGINE_SERVICE_ID,
            utilization,
            utilization,
            active.len() as u32,
            queue_depth,
            0,
            0.0,
            now,
        );
        runtime.balancer().observe(snapshot);

        if !runtime.balancer().needs_rebalance() {
            continue;
        }

        let targets = runtime.balancer().rebalance_targets();
        let current_score = runtime
            .balancer()
            .score_map()
            .get(ENGINE_SERVICE_ID)
            .copied()
            .unwrap_or(0.0);
        info!(
            previous_score,
            current_score,
            services = targets.len(),
            "system load rebalanced"
        );

        let event = DomainEvent::new(
            "system",
            0,
            now,
            DomainEventKind::SystemLoadRebalanced {
                service_id: ENGINE_SERVICE_ID.to_string(),
                previous_load: previous_score,
                current_load: current_score,
                service_loads: targets,
                rebalanced_at_ms: now,
                reason: Some("load imbalance detected".to_string()),
            },
        );
        if let Err(e) = runtime.publisher().publish(&event).await {
            warn!(error = %e, "failed to publish rebalance event");
        }
        previous_score = current_score;
    }
}
