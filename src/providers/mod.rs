//! Ports the core requires from external collaborators.
//!
//! The engine drives everything through these traits: persistence
//! ([`WorkflowStore`]), event publication ([`EventPublisher`]), remote
//! service invocation ([`ServiceClient`]), per-workflow mutual exclusion
//! ([`LockProvider`]) and time ([`Clock`]). Exact transports live with the
//! collaborators; the in-memory implementations here serve tests and
//! embedded use.
//!
//! # Contract notes
//!
//! - `WorkflowStore::save` must check the optimistic version and return a
//!   fresh view with the version incremented; a mismatch fails with
//!   [`StoreError::VersionConflict`] and must not write.
//! - `EventPublisher` is at-least-once. Consumers deduplicate on the
//!   event id carried by every [`DomainEvent`].
//! - `ServiceClient::call` is synchronous-with-timeout at the port
//!   boundary; timeouts surface as [`CallError::Timeout`] and are treated
//!   as recoverable step errors by the engine.
//! - `LockProvider` locks are TTL-bounded. A lock is released exactly
//!   once: by the holder, by TTL expiry, or transferred via `extend`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::domain::event::DomainEvent;
use crate::domain::status::{WorkflowStatus, WorkflowType};
use crate::domain::workflow::Workflow;

pub mod error;
pub mod in_memory;
pub mod record;

pub use error::{CallError, LockError, PublishError, StoreError};
pub use in_memory::{
    InMemoryEventPublisher, InMemoryLockProvider, InMemoryWorkflowStore, ManualClock,
    StaticServiceClient,
};
pub use record::{StepRecord, WorkflowRecord};

/// Persistence port for the workflow aggregate.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist the workflow, enforcing the optimistic version check.
    /// Returns the stored view with the version incremented.
    async fn save(&self, workflow: &Workflow) -> Result<Workflow, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    async fn find_by_status(&self, status: WorkflowStatus) -> Result<Vec<Workflow>, StoreError>;

    async fn find_by_type(&self, workflow_type: WorkflowType) -> Result<Vec<Workflow>, StoreError>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Workflows holding resources: EXECUTING, PAUSED or COMPENSATING.
    async fn find_active(&self) -> Result<Vec<Workflow>, StoreError>;

    /// PENDING workflows, bounded.
    async fn find_pending(&self, limit: usize) -> Result<Vec<Workflow>, StoreError>;

    /// FAILED workflows with retry budget left, bounded.
    async fn find_for_retry(&self, limit: usize) -> Result<Vec<Workflow>, StoreError>;

    /// Candidates for waveless admission: PENDING or EXECUTING, and either
    /// HIGH priority or of a waveless-capable type.
    async fn find_for_waveless(&self) -> Result<Vec<Workflow>, StoreError>;

    async fn find_created_between(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<Vec<Workflow>, StoreError>;

    async fn count_by_status(&self, status: WorkflowStatus) -> Result<u64, StoreError>;

    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Idempotent admin path: force a status without the usual checks.
    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<(), StoreError>;
}

/// Event bus port. At-least-once delivery after commit.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;

    async fn publish_to(&self, topic: &str, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Remote call port: circuit-broken RPC client with its own timeout and
/// transport retries. The engine maps the error variants onto the step
/// error taxonomy.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn call(
        &self,
        service: &str,
        operation: &str,
        request: &HashMap<String, serde_json::Value>,
    ) -> Result<HashMap<String, serde_json::Value>, CallError>;
}

/// Named TTL-bounded lock port, keyed by workflow id.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to acquire the lock. `false` means another holder has it.
    async fn try_acquire(&self, key: &str, ttl_ms: u64) -> Result<bool, LockError>;

    async fn release(&self, key: &str) -> Result<(), LockError>;

    /// Extend a held lock's TTL. `false` when the lock no longer exists.
    async fn extend(&self, key: &str, ttl_ms: u64) -> Result<bool, LockError>;

    async fn is_held(&self, key: &str) -> Result<bool, LockError>;

    /// Remaining TTL in ms, `None` when the lock is not held.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<u64>, LockError>;
}

/// Time source. Injectable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall-clock implementation of [`Clock`].
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

