//! In-memory provider implementations.
//!
//! Process-local implementations of every port, used by tests and
//! embedded deployments. The store enforces the same optimistic version
//! contract a real document store would; the lock provider honors TTLs
//! against the injected clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::event::DomainEvent;
use crate::domain::status::{WorkflowStatus, WorkflowType};
use crate::domain::workflow::Workflow;

use super::error::{CallError, LockError, PublishError, StoreError};
use super::record::WorkflowRecord;
use super::{Clock, EventPublisher, LockProvider, ServiceClient, WorkflowStore};

/// Test clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Workflow store over a mutex-guarded record map.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: Mutex<HashMap<String, WorkflowRecord>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<Workflow>
    where
        F: Fn(&WorkflowRecord) -> bool,
    {
        let records = self.records.lock().await;
        let mut matches: Vec<WorkflowRecord> =
            records.values().filter(|r| predicate(r)).cloned().collect();
        matches.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.into_iter().map(WorkflowRecord::into_workflow).collect()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save(&self, workflow: &Workflow) -> Result<Workflow, StoreError> {
        let mut record = WorkflowRecord::from_workflow(workflow);
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.id) {
            if existing.version != record.version {
                return Err(StoreError::VersionConflict {
                    workflow_id: record.id,
                    expected: record.version,
                    actual: existing.version,
                });
            }
        }
        record.version += 1;
        records.insert(record.id.clone(), record.clone());
        Ok(record.into_workflow())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(id).cloned().map(WorkflowRecord::into_workflow))
    }

    async fn find_by_status(&self, status: WorkflowStatus) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.filtered(|r| r.status == status).await)
    }

    async fn find_by_type(&self, workflow_type: WorkflowType) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.filtered(|r| r.workflow_type == workflow_type).await)
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.filtered(|r| r.correlation_id == correlation_id).await)
    }

    async fn find_active(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.filtered(|r| r.status.is_active()).await)
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Workflow>, StoreError> {
        let mut pending = self.filtered(|r| r.status == WorkflowStatus::Pending).await;
        pending.truncate(limit);
        Ok(pending)
    }

    async fn find_for_retry(&self, limit: usize) -> Result<Vec<Workflow>, StoreError> {
        let mut candidates = self
            .filtered(|r| r.status == WorkflowStatus::Failed && r.retry_count < r.max_retries)
            .await;
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn find_for_waveless(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .filtered(|r| {
                matches!(
                    r.status,
                    WorkflowStatus::Pending | WorkflowStatus::Executing
                ) && (r.priority == crate::domain::status::WorkflowPriority::High
                    || r.workflow_type.supports_waveless())
            })
            .await)
    }

    async fn find_created_between(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .filtered(|r| r.created_at_ms >= start_ms && r.created_at_ms <= end_ms)
            .await)
    }

    async fn count_by_status(&self, status: WorkflowStatus) -> Result<u64, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| r.status == status).count() as u64)
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let records = self.records.lock().await;
        Ok(records.contains_key(id))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.remove(id).map(|_| ()).ok_or(StoreError::NotFound {
            workflow_id: id.to_string(),
        })
    }

    async fn update_status(&self, id: &str, status: WorkflowStatus) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(id) {
            Some(record) => {
                record.status = status;
                record.version += 1;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                workflow_id: id.to_string(),
            }),
        }
    }
}

/// Lock provider with TTL expiry driven by the injected clock.
pub struct InMemoryLockProvider {
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, u64>>,
}

impl InMemoryLockProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn try_acquire(&self, key: &str, ttl_ms: u64) -> Result<bool, LockError> {
        let now = self.clock.now_ms();
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                locks.insert(key.to_string(), now + ttl_ms);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock().await;
        locks.remove(key);
        Ok(())
    }

    async fn extend(&self, key: &str, ttl_ms: u64) -> Result<bool, LockError> {
        let now = self.clock.now_ms();
        let mut locks = self.locks.lock().await;
        match locks.get_mut(key) {
            Some(expires_at) if *expires_at > now => {
                *expires_at = now + ttl_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_held(&self, key: &str) -> Result<bool, LockError> {
        let now = self.clock.now_ms();
        let locks = self.locks.lock().await;
        Ok(matches!(locks.get(key), Some(expires_at) if *expires_at > now))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<u64>, LockError> {
        let now = self.clock.now_ms();
        let locks = self.locks.lock().await;
        Ok(locks
            .get(key)
            .filter(|expires_at| **expires_at > now)
            .map(|expires_at| expires_at - now))
    }
}

/// Publisher that appends every event to an inspectable log.
#[derive(Default)]
pub struct InMemoryEventPublisher {
    published: Mutex<Vec<(Option<String>, DomainEvent)>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, in order.
    pub async fn events(&self) -> Vec<DomainEvent> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Event type names in publication order; convenient for assertions.
    pub async fn event_types(&self) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(_, e)| e.event_type.clone())
            .collect()
    }

    /// Events published to a specific topic.
    pub async fn events_for_topic(&self, topic: &str) -> Vec<DomainEvent> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t.as_deref() == Some(topic))
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.published.lock().await.push((None, event.clone()));
        Ok(())
    }

    async fn publish_to(&self, topic: &str, event: &DomainEvent) -> Result<(), PublishError> {
        self.published
            .lock()
            .await
            .push((Some(topic.to_string()), event.clone()));
        Ok(())
    }
}

/// Scripted remote-call client for tests.
///
/// Responses queue per (service, operation); unscripted calls succeed
/// with an empty output map. Every invocation is recorded.
#[derive(Default)]
pub struct StaticServiceClient {
    scripts: Mutex<HashMap<(String, String), VecDeque<Result<HashMap<String, serde_json::Value>, CallError>>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl StaticServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response for `service`/`operation`.
    pub async fn enqueue_response(
        &self,
        service: &str,
        operation: &str,
        response: Result<HashMap<String, serde_json::Value>, CallError>,
    ) {
        self.scripts
            .lock()
            .await
            .entry((service.to_string(), operation.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Queue the same failure `count` times.
    pub async fn enqueue_failures(&self, service: &str, operation: &str, error: CallError, count: usize) {
        for _ in 0..count {
            self.enqueue_response(service, operation, Err(error.clone())).await;
        }
    }

    /// All calls made so far as (service, operation) pairs.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self, service: &str, operation: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(s, o)| s == service && o == operation)
            .count()
    }
}

#[async_trait]
impl ServiceClient for StaticServiceClient {
    async fn call(
        &self,
        service: &str,
        operation: &str,
        _request: &HashMap<String, serde_json::Value>,
    ) -> Result<HashMap<String, serde_json::Value>, CallError> {
        self.calls
            .lock()
            .await
            .push((service.to_string(), operation.to_string()));
        let mut scripts = self.scripts.lock().await;
        if let Some(queue) = scripts.get_mut(&(service.to_string(), operation.to_string())) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::{StepDefinition, WorkflowDefinition};
    use crate::domain::status::WorkflowPriority;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            definition_id: "def-1".to_string(),
            name: "Test".to_string(),
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
                timeout_ms: None,
                retry_policy: None,
                compensation: None,
                dependencies: Vec::new(),
                optional: false,
            }],
            timeout_ms: None,
            max_retries: None,
            default_retry_policy: None,
            active: true,
        }
    }

    fn workflow(id: &str, priority: WorkflowPriority, created_at: u64) -> Workflow {
        Workflow::from_definition(
            id,
            &definition(),
            priority,
            None,
            "corr",
            HashMap::new(),
            None,
            created_at,
        )
    }

    #[tokio::test]
    async fn save_increments_version_and_detects_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let w = workflow("wf-1", WorkflowPriority::Normal, 0);
        assert_eq!(w.version, 0);

        let saved = store.save(&w).await.unwrap();
        assert_eq!(saved.version, 1);

        let again = store.save(&saved).await.unwrap();
        assert_eq!(again.version, 2);

        // Saving the stale first view now conflicts.
        let err = store.save(&saved).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn queries_filter_and_order() {
        let store = InMemoryWorkflowStore::new();
        for (id, priority, created) in [
            ("wf-b", WorkflowPriority::Normal, 20),
            ("wf-a", WorkflowPriority::High, 10),
            ("wf-c", WorkflowPriority::Low, 30),
        ] {
            store.save(&workflow(id, priority, created)).await.unwrap();
        }

        let pending = store.find_pending(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["wf-a", "wf-b", "wf-c"]);

        assert_eq!(store.count_by_status(WorkflowStatus::Pending).await.unwrap(), 3);
        assert!(store.exists("wf-a").await.unwrap());
        assert!(!store.exists("wf-z").await.unwrap());

        let bounded = store.find_pending(2).await.unwrap();
        assert_eq!(bounded.len(), 2);

        let window = store.find_created_between(15, 25).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, "wf-b");
    }

    #[tokio::test]
    async fn waveless_query_filters_by_priority_or_type() {
        let store = InMemoryWorkflowStore::new();
        // Picking supports waveless regardless of priority.
        store
            .save(&workflow("wf-pick", WorkflowPriority::Low, 1))
            .await
            .unwrap();

        // A non-waveless type only qualifies at HIGH priority.
        let mut def = definition();
        def.workflow_type = WorkflowType::CycleCount;
        let high = Workflow::from_definition(
            "wf-count",
            &def,
            WorkflowPriority::High,
            None,
            "corr",
            HashMap::new(),
            None,
            2,
        );
        store.save(&high).await.unwrap();
        let low = Workflow::from_definition(
            "wf-count-low",
            &def,
            WorkflowPriority::Low,
            None,
            "corr",
            HashMap::new(),
            None,
            3,
        );
        store.save(&low).await.unwrap();

        let eligible = store.find_for_waveless().await.unwrap();
        let ids: Vec<&str> = eligible.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["wf-pick", "wf-count"]);
    }

    #[tokio::test]
    async fn delete_and_update_status() {
        let store = InMemoryWorkflowStore::new();
        store
            .save(&workflow("wf-1", WorkflowPriority::Normal, 0))
            .await
            .unwrap();
        store
            .update_status("wf-1", WorkflowStatus::Cancelled)
            .await
            .unwrap();
        let w = store.find_by_id("wf-1").await.unwrap().unwrap();
        assert_eq!(w.status, WorkflowStatus::Cancelled);

        store.delete("wf-1").await.unwrap();
        assert!(store.find_by_id("wf-1").await.unwrap().is_none());
        assert!(store.delete("wf-1").await.is_err());
    }

    #[tokio::test]
    async fn lock_ttl_and_extend() {
        let clock = Arc::new(ManualClock::at(1_000));
        let locks = InMemoryLockProvider::new(clock.clone());

        assert!(locks.try_acquire("wf-1", 500).await.unwrap());
        assert!(!locks.try_acquire("wf-1", 500).await.unwrap());
        assert!(locks.is_held("wf-1").await.unwrap());
        assert_eq!(locks.ttl_remaining("wf-1").await.unwrap(), Some(500));

        // TTL expiry frees the lock for the next caller.
        clock.advance(600);
        assert!(!locks.is_held("wf-1").await.unwrap());
        assert!(locks.try_acquire("wf-1", 500).await.unwrap());

        // Extend while held.
        assert!(locks.extend("wf-1", 2_000).await.unwrap());
        assert_eq!(locks.ttl_remaining("wf-1").await.unwrap(), Some(2_000));

        locks.release("wf-1").await.unwrap();
        assert!(!locks.is_held("wf-1").await.unwrap());
        assert!(!locks.extend("wf-1", 100).await.unwrap());
    }

    #[tokio::test]
    async fn scripted_service_client() {
        let client = StaticServiceClient::new();
        client
            .enqueue_response(
                "inventory",
                "reserve",
                Err(CallError::Timeout {
                    service: "inventory".into(),
                    operation: "reserve".into(),
                }),
            )
            .await;
        client
            .enqueue_response("inventory", "reserve", Ok(HashMap::new()))
            .await;

        assert!(client.call("inventory", "reserve", &HashMap::new()).await.is_err());
        assert!(client.call("inventory", "reserve", &HashMap::new()).await.is_ok());
        // Unscripted calls default to success.
        assert!(client.call("robots", "assign", &HashMap::new()).await.is_ok());
        assert_eq!(client.call_count("inventory", "reserve").await, 2);
    }
}
