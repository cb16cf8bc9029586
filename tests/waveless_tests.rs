//! Waveless admission: priority batching, adaptive sizing, and the load
//! selector's saturation behavior.

mod common;

use sagaloom::domain::{LoadSnapshot, WavelessPolicy, WorkflowPriority};
use sagaloom::providers::{Clock, WorkflowStore};
use sagaloom::{LoadBalancer, StartWorkflow};

#[tokio::test]
async fn batch_admits_by_priority_with_created_at_tiebreak() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let priorities = [
        WorkflowPriority::Low,
        WorkflowPriority::High,
        WorkflowPriority::Normal,
        WorkflowPriority::High,
        WorkflowPriority::Low,
        WorkflowPriority::Normal,
    ];
    let mut ids = Vec::new();
    for priority in priorities {
        engine.clock.advance(10);
        let id = engine
            .client
            .create_workflow(StartWorkflow::new("picking-v1").with_priority(priority))
            .await
            .unwrap();
        ids.push(id);
    }

    let pending = engine.store.find_for_waveless().await.unwrap();
    assert_eq!(pending.len(), 6);

    let policy = WavelessPolicy::default();
    let batch = policy.build_batch(&pending, 3);
    let batch_ids: Vec<&str> = batch.iter().map(|w| w.id.as_str()).collect();
    // HIGH (older), HIGH (newer), then the older NORMAL.
    assert_eq!(batch_ids, vec![ids[1].as_str(), ids[3].as_str(), ids[2].as_str()]);
}

#[test]
fn recommended_batch_sizes_for_reference_loads() {
    let policy = WavelessPolicy::default();
    let cases = [(96.0, 2), (88.0, 5), (60.0, 10), (40.0, 20), (70.0, 10), (85.0, 5)];
    for (load, expected) in cases {
        assert_eq!(
            policy.batch_size_for_load(load),
            expected,
            "load {load} should recommend {expected}"
        );
    }
}

#[test]
fn selector_returns_empty_when_everything_is_saturated() {
    let balancer = LoadBalancer::default();
    // Score at target utilization: cannot accept work.
    balancer.observe(LoadSnapshot::new(
        "inventory",
        "inventory",
        100.0,
        100.0,
        50,
        1_000,
        50,
        0.25,
        1,
    ));
    // Low load but the error rate disqualifies it.
    balancer.observe(LoadSnapshot::new(
        "robots", "robots", 10.0, 10.0, 50, 0, 50, 0.55, 1,
    ));
    assert_eq!(balancer.select_target(), None);

    // A healthy target restores selection.
    balancer.observe(LoadSnapshot::new(
        "packing", "packing", 10.0, 10.0, 5, 0, 50, 0.0, 2,
    ));
    assert_eq!(balancer.select_target().as_deref(), Some("packing"));
}

#[tokio::test]
async fn high_priority_workflows_bypass_batching() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let policy = WavelessPolicy::default();

    let high = engine
        .client
        .create_workflow(StartWorkflow::new("picking-v1").with_priority(WorkflowPriority::High))
        .await
        .unwrap();
    let normal = engine
        .client
        .create_workflow(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();

    let now = engine.clock.now_ms();
    let workflows = engine.store.find_for_waveless().await.unwrap();
    let high_wf = workflows.iter().find(|w| w.id == high).unwrap();
    let normal_wf = workflows.iter().find(|w| w.id == normal).unwrap();

    assert!(policy.should_process_immediately(high_wf, now));
    assert!(!policy.should_process_immediately(normal_wf, now));
    // A normal workflow that waited over a minute also bypasses batching.
    assert!(policy.should_process_immediately(normal_wf, now + 61_000));
}

#[tokio::test]
async fn waveless_transition_is_recorded_and_announced() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("picking-v1").with_priority(WorkflowPriority::High))
        .await
        .unwrap();

    engine.client.enable_waveless(&id).await.unwrap();

    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(
        workflow.context.get("wavelessEnabled"),
        Some(&serde_json::Value::Bool(true))
    );
    let event_types = engine.publisher.event_types().await;
    assert!(event_types.contains(&"WavelessProcessingEnabled".to_string()));

    // NORMAL priority workflows are not eligible.
    let normal = engine
        .client
        .start(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();
    assert!(engine.client.enable_waveless(&normal).await.is_err());
}
