//! Shared harness for integration tests: an engine wired entirely with
//! in-memory providers and a hand-advanced clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sagaloom::domain::{
    CompensationAction, StepDefinition, WorkflowDefinition, WorkflowStatus, WorkflowType,
};
use sagaloom::providers::{
    InMemoryEventPublisher, InMemoryLockProvider, InMemoryWorkflowStore, ManualClock,
    StaticServiceClient, WorkflowStore,
};
use sagaloom::{Client, DefinitionRegistry};

pub struct TestEngine {
    pub store: Arc<InMemoryWorkflowStore>,
    pub publisher: Arc<InMemoryEventPublisher>,
    pub services: Arc<StaticServiceClient>,
    pub locks: Arc<InMemoryLockProvider>,
    pub clock: Arc<ManualClock>,
    pub client: Arc<Client>,
}

/// Opt-in test logging: `RUST_LOG=sagaloom=debug cargo test -- --nocapture`.
#[allow(dead_code)]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn engine_with(definitions: Vec<WorkflowDefinition>) -> TestEngine {
    init_tracing();
    let store = Arc::new(InMemoryWorkflowStore::new());
    let publisher = Arc::new(InMemoryEventPublisher::new());
    let services = Arc::new(StaticServiceClient::new());
    let clock = Arc::new(ManualClock::at(1_000));
    let locks = Arc::new(InMemoryLockProvider::new(clock.clone()));

    let mut builder = DefinitionRegistry::builder();
    for definition in definitions {
        builder = builder.register(definition);
    }
    let client = Arc::new(Client::new(
        store.clone(),
        publisher.clone(),
        services.clone(),
        locks.clone(),
        clock.clone(),
        builder.build(),
    ));

    TestEngine {
        store,
        publisher,
        services,
        locks,
        clock,
        client,
    }
}

/// The canonical three-step order-fulfillment template: every step has a
/// reverse-operation compensation against its own service.
#[allow(dead_code)]
pub fn order_fulfillment_definition() -> WorkflowDefinition {
    let step = |id: &str, service: &str, order: u32, deps: Vec<&str>| StepDefinition {
        step_id: id.to_string(),
        step_name: id.to_string(),
        step_type: "task".to_string(),
        service_name: service.to_string(),
        operation: id.to_string(),
        execution_order: order,
        default_inputs: HashMap::new(),
        timeout_ms: Some(5_000),
        retry_policy: None,
        compensation: Some(CompensationAction::reverse_operation(
            id,
            service,
            &format!("undo-{id}"),
            HashMap::new(),
        )),
        dependencies: deps.into_iter().map(String::from).collect(),
        optional: false,
    };
    WorkflowDefinition {
        definition_id: "order-fulfillment-v1".to_string(),
        name: "Order Fulfillment".to_string(),
        description: Some("Reserve, assign, pick".to_string()),
        workflow_type: WorkflowType::OrderFulfillment,
        version: "1.0".to_string(),
        steps: vec![
            step("reserve-inventory", "inventory-service", 1, vec![]),
            step("assign-robot", "robot-service", 2, vec!["reserve-inventory"]),
            step("pick-items", "picking-service", 3, vec!["assign-robot"]),
        ],
        timeout_ms: None,
        max_retries: None,
        default_retry_policy: None,
        active: true,
    }
}

/// Single-step picking template without compensation, for scheduler tests.
#[allow(dead_code)]
pub fn picking_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        definition_id: "picking-v1".to_string(),
        name: "Picking".to_string(),
        description: None,
        workflow_type: WorkflowType::Picking,
        version: "1.0".to_string(),
        steps: vec![StepDefinition {
            step_id: "pick".to_string(),
            step_name: "Pick".to_string(),
            step_type: "task".to_string(),
            service_name: "picking-service".to_string(),
            operation: "pick".to_string(),
            execution_order: 1,
            default_inputs: HashMap::new(),
            timeout_ms: Some(5_000),
            retry_policy: None,
            compensation: None,
            dependencies: vec![],
            optional: false,
        }],
        timeout_ms: None,
        max_retries: None,
        default_retry_policy: None,
        active: true,
    }
}

/// Poll the store until `predicate` holds for the workflow or the
/// timeout elapses. Returns whether the predicate was satisfied.
#[allow(dead_code)]
pub async fn wait_for_status(
    store: &Arc<InMemoryWorkflowStore>,
    workflow_id: &str,
    status: WorkflowStatus,
    timeout_ms: u64,
) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(Some(workflow)) = store.find_by_id(workflow_id).await {
            if workflow.status == status {
                return true;
            }
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
