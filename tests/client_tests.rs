//! Client transaction protocol: locking, state errors, outbox-after-commit
//! semantics, and event replay.

mod common;

use sagaloom::domain::{
    DomainEventKind, StepResult, WorkflowStatus,
};
use sagaloom::providers::{Clock, LockProvider, WorkflowStore};
use sagaloom::{ClientError, StartWorkflow};
use std::collections::HashMap;

#[tokio::test]
async fn operations_fail_fast_when_lock_is_held_elsewhere() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();

    // Another worker holds the workflow lock.
    assert!(engine.locks.try_acquire(&id, 60_000).await.unwrap());
    let err = engine
        .client
        .cancel_workflow(&id, "operator")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::LockUnavailable { .. }));
    assert!(err.is_retryable());

    // Once released, the same call goes through.
    engine.locks.release(&id).await.unwrap();
    engine.client.cancel_workflow(&id, "operator").await.unwrap();
    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn lock_is_released_after_each_operation() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();
    engine.client.run_next_step(&id).await.unwrap();
    assert!(!engine.locks.is_held(&id).await.unwrap());
}

#[tokio::test]
async fn invalid_transitions_surface_as_state_errors_without_side_effects() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();
    engine.client.run_next_step(&id).await.unwrap(); // completes the single step

    let before_events = engine.publisher.events().await.len();
    let before = engine.client.workflow(&id).await.unwrap();

    // Cancelling a completed workflow is a caller bug.
    let err = engine
        .client
        .cancel_workflow(&id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::State(_)));
    assert!(!err.is_retryable());

    // Nothing was persisted or published for the rejected call.
    let after = engine.client.workflow(&id).await.unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.version, before.version);
    assert_eq!(engine.publisher.events().await.len(), before_events);
}

#[tokio::test]
async fn unknown_ids_are_reported() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let err = engine
        .client
        .start(StartWorkflow::new("missing-definition"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DefinitionNotFound { .. }));

    let err = engine.client.workflow("wf-missing").await.unwrap_err();
    assert!(matches!(err, ClientError::WorkflowNotFound { .. }));

    let err = engine
        .client
        .resume_workflow("wf-missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::WorkflowNotFound { .. }));
}

#[tokio::test]
async fn every_commit_increments_the_version_and_publishes_its_outbox() {
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("order-fulfillment-v1"))
        .await
        .unwrap();
    assert_eq!(engine.client.workflow(&id).await.unwrap().version, 1);
    assert_eq!(engine.publisher.event_types().await, vec!["WorkflowStarted"]);

    engine.client.run_next_step(&id).await.unwrap();
    assert_eq!(engine.client.workflow(&id).await.unwrap().version, 2);
    assert_eq!(
        engine.publisher.event_types().await,
        vec!["WorkflowStarted", "WorkflowStepExecuted"]
    );
}

#[tokio::test]
async fn stale_saves_conflict_and_commit_nothing() {
    let engine = common::engine_with(vec![common::picking_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("picking-v1"))
        .await
        .unwrap();

    // Two workers load the same version; the second save must lose.
    let mut first = engine.store.find_by_id(&id).await.unwrap().unwrap();
    let mut second = first.clone();

    first.pause(None, 2_000).unwrap();
    let events = first.take_events();
    engine.store.save(&first).await.unwrap();
    assert_eq!(events.len(), 1);

    second.cancel("stale view", 2_001).unwrap();
    let _stale_events = second.take_events();
    let err = engine.store.save(&second).await.unwrap_err();
    assert!(err.is_retryable());

    // The loser's mutation is not visible anywhere.
    let stored = engine.store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Paused);
}

#[tokio::test]
async fn pause_resume_cancel_through_the_client() {
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("order-fulfillment-v1"))
        .await
        .unwrap();

    engine
        .client
        .pause_workflow(&id, Some("conveyor jam".to_string()))
        .await
        .unwrap();
    assert_eq!(
        engine.client.workflow(&id).await.unwrap().status,
        WorkflowStatus::Paused
    );

    engine.client.resume_workflow(&id).await.unwrap();
    assert_eq!(
        engine.client.workflow(&id).await.unwrap().status,
        WorkflowStatus::Executing
    );

    engine.client.cancel_workflow(&id, "order voided").await.unwrap();
    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);

    // A cancelled workflow accepts no further step work.
    let err = engine
        .client
        .execute_step(
            &id,
            "reserve-inventory",
            StepResult::success("reserve-inventory", HashMap::new(), 1, 9_999),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::State(_)));

    let event_types = engine.publisher.event_types().await;
    assert_eq!(
        event_types,
        vec![
            "WorkflowStarted",
            "WorkflowPaused",
            "WorkflowResumed",
            "WorkflowCancelled",
        ]
    );
}

/// Replay check: folding the published event stream over an empty
/// projection reconstructs the workflow's terminal status.
fn replay_status(events: &[sagaloom::domain::DomainEvent]) -> Option<WorkflowStatus> {
    let mut status = None;
    for event in events {
        status = Some(match &event.kind {
            DomainEventKind::WorkflowStarted { .. } => WorkflowStatus::Executing,
            DomainEventKind::WorkflowStepExecuted { .. }
            | DomainEventKind::WorkflowStepFailed { .. } => status.unwrap_or(WorkflowStatus::Executing),
            DomainEventKind::WorkflowFailed { .. } => WorkflowStatus::Failed,
            DomainEventKind::WorkflowCompleted { .. } => WorkflowStatus::Completed,
            DomainEventKind::WorkflowPaused { .. } => WorkflowStatus::Paused,
            DomainEventKind::WorkflowResumed { .. } => WorkflowStatus::Executing,
            DomainEventKind::WorkflowCancelled { .. } => WorkflowStatus::Cancelled,
            DomainEventKind::WorkflowRetry { .. } => WorkflowStatus::Executing,
            DomainEventKind::WorkflowCompensationStarted { .. } => WorkflowStatus::Compensating,
            DomainEventKind::WorkflowCompensationCompleted { .. } => WorkflowStatus::Compensated,
            DomainEventKind::WavelessProcessingEnabled { .. }
            | DomainEventKind::SystemLoadRebalanced { .. } => {
                status.unwrap_or(WorkflowStatus::Executing)
            }
        });
    }
    status
}

#[tokio::test]
async fn replaying_events_reconstructs_the_terminal_status() {
    // Happy path replays to COMPLETED.
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
    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(replay_status(&events), Some(workflow.status));
    assert_eq!(replay_status(&events), Some(WorkflowStatus::Completed));

    // Compensation path replays to COMPENSATED.
    let engine = common::engine_with(vec![common::order_fulfillment_definition()]);
    let id = engine
        .client
        .start(StartWorkflow::new("order-fulfillment-v1"))
        .await
        .unwrap();
    engine.client.run_next_step(&id).await.unwrap();
    engine.client.start_step(&id, "assign-robot").await.unwrap();
    let error = sagaloom::domain::WorkflowError::of_kind(
        sagaloom::domain::ErrorKind::DataIntegrity,
        "CORRUPT",
        "tote mismatch",
        Some("assign-robot".to_string()),
        Some("robot-service".to_string()),
        engine.clock.now_ms(),
    );
    engine.client.fail_step(&id, "assign-robot", error).await.unwrap();

    let events = engine.publisher.events().await;
    let workflow = engine.client.workflow(&id).await.unwrap();
    assert_eq!(replay_status(&events), Some(workflow.status));
    assert_eq!(replay_status(&events), Some(WorkflowStatus::Compensated));
}
