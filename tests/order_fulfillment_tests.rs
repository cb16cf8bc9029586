//! Happy-path scenario: a three-step order fulfillment runs to
//! completion, leaving the expected logs and event sequence.

mod common;

use sagaloom::domain::{DomainEventKind, WorkflowStatus};
use sagaloom::{StartWorkflow, StepOutcome};

#[tokio::test]
async fn happy_order_fulfillment_completes_with_ordered_events() {
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);

    let id = engine
        .client
        .start(
            StartWorkflow::new("order-fulfillment-v1")
                .with_correlation_id("order-42")
                .with_input("orderId", serde_json::json!("order-42")),
        )
        .await
        .unwrap();

    for expected_step in ["reserve-inventory", "assign-robot", "pick-items"] {
        engine.clock.advance(100);
        let outcome = engine.client.run_next_step(&id).await.unwrap();
        match outcome {
            StepOutcome::Completed {
                step_id,
                workflow_completed,
            } => {
                assert_eq!(step_id, expected_step);
                assert_eq!(workflow_completed, expected_step == "pick-items");
            }
            other => panic!("unexpected outcome for {expected_step}: {other:?}"),
        }
    }

    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(
        workflow.executed_steps,
        vec!["reserve-inventory", "assign-robot", "pick-items"]
    );
    assert!(workflow.compensated_steps.is_empty());
    assert!(workflow.completed_at_ms.is_some());
    assert_eq!(workflow.progress_percent(), 100.0);

    let event_types = engine.publisher.event_types().await;
    assert_eq!(
        event_types,
        vec![
            "WorkflowStarted",
            "WorkflowStepExecuted",
            "WorkflowStepExecuted",
            "WorkflowStepExecuted",
            "WorkflowCompleted",
        ]
    );

    // Each downstream service saw exactly one call.
    assert_eq!(engine.services.call_count("inventory-service", "reserve-inventory").await, 1);
    assert_eq!(engine.services.call_count("robot-service", "assign-robot").await, 1);
    assert_eq!(engine.services.call_count("picking-service", "pick-items").await, 1);
}

#[tokio::test]
async fn completed_event_carries_duration_and_step_count() {
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("order-fulfillment-v1"))
        .await
        .unwrap();

    for _ in 0..3 {
        engine.clock.advance(500);
        engine.client.run_next_step(&id).await.unwrap();
    }

    let events = engine.publisher.events().await;
    let completed = events
        .iter()
        .find(|e| e.event_type == "WorkflowCompleted")
        .expect("completed event");
    match &completed.kind {
        DomainEventKind::WorkflowCompleted {
            duration_ms,
            total_steps,
            ..
        } => {
            assert_eq!(*total_steps, 3);
            assert!(*duration_ms > 0);
        }
        other => panic!("unexpected kind {other:?}"),
    }
}

#[tokio::test]
async fn events_are_unique_and_versioned() {
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("order-fulfillment-v1"))
        .await
        .unwrap();
    for _ in 0..3 {
        engine.client.run_next_step(&id).await.unwrap();
    }

    let events = engine.publisher.events().await;
    let mut ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), events.len(), "event ids must be unique");
    assert!(events.iter().all(|e| e.aggregate_id == id));
}
