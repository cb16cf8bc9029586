//! # Sagaloom: saga-based workflow orchestration engine
//!
//! Sagaloom drives long-running, multi-step business processes that span
//! many remote services. Each workflow is an ordered sequence of steps;
//! each step invokes a downstream service through a narrow port. The
//! engine guarantees progress under partial failure via the saga pattern:
//! forward recovery through bounded retries with exponential backoff, and
//! backward recovery through compensating actions executed in reverse
//! order of the successful steps.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use sagaloom::domain::{StepDefinition, WorkflowDefinition, WorkflowType};
//! use sagaloom::providers::{
//!     InMemoryEventPublisher, InMemoryLockProvider, InMemoryWorkflowStore, StaticServiceClient,
//!     SystemClock,
//! };
//! use sagaloom::{Client, DefinitionRegistry, StartWorkflow};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Describe the workflow as data.
//! let definition = WorkflowDefinition {
//!     definition_id: "order-fulfillment-v1".into(),
//!     name: "Order Fulfillment".into(),
//!     description: None,
//!     workflow_type: WorkflowType::OrderFulfillment,
//!     version: "1.0".into(),
//!     steps: vec![StepDefinition {
//!         step_id: "reserve-inventory".into(),
//!         step_name: "Reserve Inventory".into(),
//!         step_type: "task".into(),
//!         service_name: "inventory-service".into(),
//!         operation: "reserve".into(),
//!         execution_order: 1,
//!         default_inputs: HashMap::new(),
//!         timeout_ms: Some(5_000),
//!         retry_policy: None,
//!         compensation: None,
//!         dependencies: vec![],
//!         optional: false,
//!     }],
//!     timeout_ms: None,
//!     max_retries: None,
//!     default_retry_policy: None,
//!     active: true,
//! };
//!
//! // 2. Wire the ports (in-memory here; real adapters in production).
//! let clock = Arc::new(SystemClock);
//! let client = Client::new(
//!     Arc::new(InMemoryWorkflowStore::new()),
//!     Arc::new(InMemoryEventPublisher::new()),
//!     Arc::new(StaticServiceClient::new()),
//!     Arc::new(InMemoryLockProvider::new(clock.clone())),
//!     clock,
//!     DefinitionRegistry::builder().register(definition).build(),
//! );
//!
//! // 3. Start a workflow and drive its steps.
//! let id = client.start(StartWorkflow::new("order-fulfillment-v1")).await?;
//! client.run_next_step(&id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                          Client                               |
//! |  start / execute_step / fail_step / run_next_step / cancel    |
//! |  lock -> load -> mutate -> persist -> publish -> release      |
//! +-------------------------------+-------------------------------+
//!                                 |
//!           +---------------------+---------------------+
//!           |                                           |
//! +---------v----------+                     +----------v---------+
//! |  ExecutionService  |                     |   Runtime loops    |
//! |  step lifecycle,   |                     |  waveless dispatch |
//! |  timeout synthesis |                     |  load monitor      |
//! +---------+----------+                     +----------+---------+
//!           |                                           |
//! +---------v----------+                     +----------v---------+
//! |  SagaCoordinator   |                     |    LoadBalancer    |
//! |  forward/backward  |                     |  target selection, |
//! |  recovery          |                     |  admission gate    |
//! +---------+----------+                     +--------------------+
//!           |
//! +---------v-----------------------------------------------------+
//! |                    Workflow aggregate                         |
//! |  status machine, ordered step table, executed/compensated     |
//! |  logs, error log, pending-event outbox                        |
//! +---------------------------------------------------------------+
//!           |
//! +---------v-----------------------------------------------------+
//! |  Ports: WorkflowStore | EventPublisher | ServiceClient        |
//! |         LockProvider  | Clock                                 |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Concepts
//!
//! - **Workflow**: a state machine over an ordered step table. All
//!   mutation goes through aggregate methods under a per-workflow lock.
//! - **Forward recovery**: failed steps retry with exponential backoff up
//!   to their budget. The engine never sleeps — it reports the delay and
//!   the waveless scheduler re-admits the workflow when it is due.
//! - **Backward recovery**: when a non-recoverable error strikes, every
//!   completed step's compensation action runs in reverse execution
//!   order. Partial compensation still terminates the workflow, flagged
//!   unsuccessful for out-of-band reconciliation.
//! - **Waveless processing**: pending workflows are admitted continuously
//!   in priority-ordered batches whose size and cadence adapt to load,
//!   instead of periodic waves.
//! - **Outbox**: domain events queue on the aggregate and are published
//!   only after the persisted write commits, at-least-once.

pub mod balancer;
pub mod client;
pub mod domain;
pub mod execution;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod saga;

pub use balancer::{HealthStatus, LoadBalancer, LoadBalancerConfig, LoadTrend};
pub use client::{Client, ClientConfig, ClientError, StartWorkflow, StepOutcome};
pub use execution::{ExecutionService, RecoveryOutcome};
pub use registry::{DefinitionRegistry, DefinitionRegistryBuilder};
pub use runtime::{Runtime, RuntimeOptions};
pub use saga::SagaCoordinator;

use std::sync::Arc;

/// Shared reference to a workflow store implementation.
pub type WorkflowStoreRef = Arc<dyn providers::WorkflowStore>;

/// Shared reference to an event publisher implementation.
pub type EventPublisherRef = Arc<dyn providers::EventPublisher>;

/// Shared reference to a remote-call client implementation.
pub type ServiceClientRef = Arc<dyn providers::ServiceClient>;

/// Shared reference to a lock provider implementation.
pub type LockProviderRef = Arc<dyn providers::LockProvider>;

/// Shared reference to a clock implementation.
pub type ClockRef = Arc<dyn providers::Clock>;
