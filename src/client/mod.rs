//! Transactional application surface.
//!
//! The `Client` is the entry point for everything outside the core: it
//! wraps every aggregate mutation in the per-workflow transaction
//! protocol — acquire the named lock, load, mutate, persist with the
//! optimistic version check, publish the drained outbox, release — and it
//! drives actual remote work (step invocations and compensation calls)
//! through the service-client port.
//!
//! Events are published only after the persisted write commits; a failed
//! save leaves both store and outbox untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::compensation::CompensationAction;
use crate::domain::error::{ErrorKind, StateError, WorkflowError};
use crate::domain::result::StepResult;
use crate::domain::status::{WorkflowPriority, WorkflowStatus};
use crate::domain::waveless::{DEFAULT_BATCH_SIZE, DEFAULT_TICK_INTERVAL_MS};
use crate::domain::workflow::Workflow;
use crate::execution::{ExecutionService, RecoveryOutcome};
use crate::providers::{
    Clock, EventPublisher, LockError, LockProvider, ServiceClient, StoreError, WorkflowStore,
};
use crate::registry::DefinitionRegistry;
use crate::saga::SagaCoordinator;

/// Default lock TTL; must cover one workflow transaction including remote
/// calls.
const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// Bounded reload-mutate-save retries on optimistic version conflicts.
const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 3;

/// Client-facing error surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    WorkflowNotFound { workflow_id: String },
    DefinitionNotFound { definition_id: String },
    InvalidDefinition { definition_id: String },
    /// Another worker holds the workflow lock; back off and retry.
    LockUnavailable { workflow_id: String },
    State(StateError),
    Store(StoreError),
    Lock(LockError),
}

impl ClientError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::LockUnavailable { .. } => true,
            ClientError::Store(e) => e.is_retryable(),
            ClientError::Lock(_) => true,
            ClientError::WorkflowNotFound { .. }
            | ClientError::DefinitionNotFound { .. }
            | ClientError::InvalidDefinition { .. }
            | ClientError::State(_) => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            ClientError::DefinitionNotFound { definition_id } => {
                write!(f, "workflow definition not found: {definition_id}")
            }
            ClientError::InvalidDefinition { definition_id } => {
                write!(f, "workflow definition invalid: {definition_id}")
            }
            ClientError::LockUnavailable { workflow_id } => {
                write!(f, "workflow {workflow_id} is locked by another worker")
            }
            ClientError::State(e) => write!(f, "{e}"),
            ClientError::Store(e) => write!(f, "{e}"),
            ClientError::Lock(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<StateError> for ClientError {
    fn from(e: StateError) -> Self {
        ClientError::State(e)
    }
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        ClientError::Store(e)
    }
}

impl From<LockError> for ClientError {
    fn from(e: LockError) -> Self {
        ClientError::Lock(e)
    }
}

/// Command to create and start a workflow.
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub definition_id: String,
    pub priority: WorkflowPriority,
    pub triggered_by: Option<String>,
    pub correlation_id: Option<String>,
    pub input_parameters: HashMap<String, serde_json::Value>,
    pub max_retries: Option<u32>,
    pub enable_waveless: bool,
}

impl StartWorkflow {
    pub fn new(definition_id: &str) -> Self {
        Self {
            definition_id: definition_id.to_string(),
            priority: WorkflowPriority::Normal,
            triggered_by: None,
            correlation_id: None,
            input_parameters: HashMap::new(),
            max_retries: None,
            enable_waveless: false,
        }
    }

    pub fn with_priority(mut self, priority: WorkflowPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_input(mut self, key: &str, value: serde_json::Value) -> Self {
        self.input_parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_waveless(mut self) -> Self {
        self.enable_waveless = true;
        self
    }
}

/// Outcome of driving one step through the remote-call port.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step succeeded; `workflow_completed` when it was the last one.
    Completed {
        step_id: String,
        workflow_completed: bool,
    },
    /// Step failed recoverably; the scheduler re-admits after the delay.
    Retrying { step_id: String, delay_ms: u64 },
    /// Step failed terminally; `compensated` when backward recovery ran.
    Failed { step_id: String, compensated: bool },
    /// Nothing runnable right now.
    Idle,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub lock_ttl_ms: u64,
    pub max_save_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }
}

/// Workflow control-plane client.
pub struct Client {
    store: Arc<dyn WorkflowStore>,
    publisher: Arc<dyn EventPublisher>,
    services: Arc<dyn ServiceClient>,
    locks: Arc<dyn LockProvider>,
    clock: Arc<dyn Clock>,
    definitions: Arc<DefinitionRegistry>,
    execution: ExecutionService,
    config: ClientConfig,
}

impl Client {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        publisher: Arc<dyn EventPublisher>,
        services: Arc<dyn ServiceClient>,
        locks: Arc<dyn LockProvider>,
        clock: Arc<dyn Clock>,
        definitions: Arc<DefinitionRegistry>,
    ) -> Self {
        Self {
            store,
            publisher,
            services,
            locks,
            clock,
            definitions,
            execution: ExecutionService::new(SagaCoordinator::new()),
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle commands
    // ------------------------------------------------------------------

    /// Create a PENDING workflow from its definition and persist it.
    /// Admission (the start call) is left to the caller or the scheduler.
    pub async fn create_workflow(&self, command: StartWorkflow) -> Result<String, ClientError> {
        let workflow = self.instantiate(&command)?;
        let id = workflow.id.clone();
        self.store.save(&workflow).await?;
        info!(workflow_id = %id, definition_id = %command.definition_id, "workflow created");
        Ok(id)
    }

    /// Create a workflow and start its saga in one transaction.
    pub async fn start(&self, command: StartWorkflow) -> Result<String, ClientError> {
        let enable_waveless = command.enable_waveless;
        let mut workflow = self.instantiate(&command)?;
        let now = self.clock.now_ms();
        self.execution.saga().start_saga(&mut workflow, now)?;
        if enable_waveless && workflow.can_transition_to_waveless() {
            workflow.transition_to_waveless(DEFAULT_BATCH_SIZE, DEFAULT_TICK_INTERVAL_MS, now)?;
        }
        let events = workflow.take_events();
        let saved = self.store.save(&workflow).await?;
        self.publish_all(&events).await;
        info!(workflow_id = %saved.id, "workflow started");
        Ok(saved.id)
    }

    /// Start a previously created PENDING workflow.
    pub async fn start_workflow(&self, workflow_id: &str) -> Result<(), ClientError> {
        self.with_locked_workflow(workflow_id, |execution, workflow, now| {
            execution.saga().start_saga(workflow, now)?;
            Ok(())
        })
        .await
    }

    /// Start a step (or detect that a running one timed out). Used by
    /// callers that report step results from the outside, and by janitor
    /// sweeps checking per-step timeouts.
    pub async fn start_step(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<RecoveryOutcome>, ClientError> {
        let step = step_id.to_string();
        self.with_locked_workflow(workflow_id, move |execution, workflow, now| {
            Ok(execution.execute_step_with_timeout(workflow, &step, now)?)
        })
        .await
    }

    /// Record an externally produced step result.
    pub async fn execute_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        result: StepResult,
    ) -> Result<bool, ClientError> {
        let step = step_id.to_string();
        self.with_locked_workflow(workflow_id, move |execution, workflow, now| {
            Ok(execution.execute_step(workflow, &step, result.clone(), now)?)
        })
        .await
    }

    /// Record an externally observed step failure and run recovery. When
    /// backward recovery starts, the compensation calls are driven here,
    /// inside the same locked transaction.
    pub async fn fail_step(
        &self,
        workflow_id: &str,
        step_id: &str,
        error: WorkflowError,
    ) -> Result<RecoveryOutcome, ClientError> {
        self.acquire(workflow_id).await?;
        let result = self.fail_step_locked(workflow_id, step_id, error).await;
        self.release(workflow_id).await;
        result
    }

    /// Drive the workflow's next runnable step through the remote-call
    /// port: start it, invoke the downstream service, record the outcome,
    /// and recover on failure. PENDING workflows are started first.
    pub async fn run_next_step(&self, workflow_id: &str) -> Result<StepOutcome, ClientError> {
        self.acquire(workflow_id).await?;
        let result = self.run_next_step_locked(workflow_id).await;
        self.release(workflow_id).await;
        result
    }

    pub async fn pause_workflow(
        &self,
        workflow_id: &str,
        reason: Option<String>,
    ) -> Result<(), ClientError> {
        self.with_locked_workflow(workflow_id, move |execution, workflow, now| {
            execution.pause(workflow, reason.clone(), now)?;
            Ok(())
        })
        .await
    }

    pub async fn resume_workflow(&self, workflow_id: &str) -> Result<(), ClientError> {
        self.with_locked_workflow(workflow_id, |execution, workflow, now| {
            execution.resume(workflow, now)?;
            Ok(())
        })
        .await
    }

    pub async fn cancel_workflow(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<(), ClientError> {
        let reason = reason.to_string();
        self.with_locked_workflow(workflow_id, move |execution, workflow, now| {
            execution.cancel(workflow, &reason, now)?;
            Ok(())
        })
        .await
    }

    /// Retry a FAILED workflow (or a single failed step when `step_id` is
    /// given) within the retry budget.
    pub async fn retry_workflow(
        &self,
        workflow_id: &str,
        step_id: Option<&str>,
    ) -> Result<(), ClientError> {
        let step_id = step_id.map(String::from);
        self.with_locked_workflow(workflow_id, move |_execution, workflow, now| {
            match &step_id {
                Some(step) => workflow.retry_step(step)?,
                None => workflow.retry(now)?,
            }
            Ok(())
        })
        .await
    }

    /// Manually compensate a failed workflow: backward recovery plus the
    /// actual compensation calls, in reverse executed order.
    pub async fn compensate_workflow(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<bool, ClientError> {
        self.acquire(workflow_id).await?;
        let result = self.compensate_workflow_locked(workflow_id, reason).await;
        self.release(workflow_id).await;
        result
    }

    /// Enable waveless processing for an eligible workflow.
    pub async fn enable_waveless(&self, workflow_id: &str) -> Result<(), ClientError> {
        self.with_locked_workflow(workflow_id, |_execution, workflow, now| {
            workflow.transition_to_waveless(DEFAULT_BATCH_SIZE, DEFAULT_TICK_INTERVAL_MS, now)?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn workflow(&self, workflow_id: &str) -> Result<Workflow, ClientError> {
        self.store
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| ClientError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    pub async fn active_workflows(&self) -> Result<Vec<Workflow>, ClientError> {
        Ok(self.store.find_active().await?)
    }

    pub async fn workflows_by_status(
        &self,
        status: WorkflowStatus,
    ) -> Result<Vec<Workflow>, ClientError> {
        Ok(self.store.find_by_status(status).await?)
    }

    pub async fn workflows_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<Workflow>, ClientError> {
        Ok(self.store.find_by_correlation_id(correlation_id).await?)
    }

    /// Compensation progress 0..100 for one workflow.
    pub async fn compensation_progress(&self, workflow_id: &str) -> Result<f64, ClientError> {
        let workflow = self.workflow(workflow_id).await?;
        Ok(self.execution.saga().compensation_progress(&workflow))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn instantiate(&self, command: &StartWorkflow) -> Result<Workflow, ClientError> {
        let definition = self.definitions.get(&command.definition_id).ok_or_else(|| {
            ClientError::DefinitionNotFound {
                definition_id: command.definition_id.clone(),
            }
        })?;
        if !definition.validate() {
            return Err(ClientError::InvalidDefinition {
                definition_id: command.definition_id.clone(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        let correlation_id = command
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Ok(Workflow::from_definition(
            &id,
            definition,
            command.priority,
            command.triggered_by.clone(),
            &correlation_id,
            command.input_parameters.clone(),
            command.max_retries,
            self.clock.now_ms(),
        ))
    }

    async fn acquire(&self, workflow_id: &str) -> Result<(), ClientError> {
        let acquired = self
            .locks
            .try_acquire(workflow_id, self.config.lock_ttl_ms)
            .await?;
        if !acquired {
            debug!(workflow_id, "workflow lock unavailable");
            return Err(ClientError::LockUnavailable {
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(())
    }

    async fn release(&self, workflow_id: &str) {
        if let Err(e) = self.locks.release(workflow_id).await {
            warn!(workflow_id, error = %e, "failed to release workflow lock");
        }
    }

    /// Lock, then load-mutate-persist-publish with bounded retries on
    /// version conflicts. The mutation must be pure against the aggregate;
    /// it reruns on conflict.
    async fn with_locked_workflow<T, F>(
        &self,
        workflow_id: &str,
        mut mutate: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut(&ExecutionService, &mut Workflow, u64) -> Result<T, ClientError>,
    {
        self.acquire(workflow_id).await?;
        let result = self.transact(workflow_id, &mut mutate).await;
        self.release(workflow_id).await;
        result
    }

    async fn transact<T, F>(&self, workflow_id: &str, mutate: &mut F) -> Result<T, ClientError>
    where
        F: FnMut(&ExecutionService, &mut Workflow, u64) -> Result<T, ClientError>,
    {
        let mut last_conflict: Option<StoreError> = None;
        for attempt in 0..self.config.max_save_attempts {
            let mut workflow = self.workflow(workflow_id).await?;
            let now = self.clock.now_ms();
            let value = mutate(&self.execution, &mut workflow, now)?;
            let events = workflow.take_events();
            match self.store.save(&workflow).await {
                Ok(_) => {
                    self.publish_all(&events).await;
                    return Ok(value);
                }
                Err(e @ StoreError::VersionConflict { .. }) => {
                    warn!(workflow_id, attempt, "version conflict; reloading");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ClientError::Store(last_conflict.unwrap_or_else(|| {
            StoreError::backend_retryable("save", "version conflict retries exhausted")
        })))
    }

    /// Publish a drained outbox. Publication failures are logged, not
    /// propagated: the write committed, and the bus is at-least-once.
    async fn publish_all(&self, events: &[crate::domain::event::DomainEvent]) {
        for event in events {
            if let Err(e) = self.publisher.publish(event).await {
                error!(event_type = %event.event_type, error = %e, "failed to publish event");
            }
        }
    }

    async fn fail_step_locked(
        &self,
        workflow_id: &str,
        step_id: &str,
        error: WorkflowError,
    ) -> Result<RecoveryOutcome, ClientError> {
        let mut workflow = self.workflow(workflow_id).await?;
        let now = self.clock.now_ms();
        let outcome = self
            .execution
            .handle_step_failure(&mut workflow, step_id, error, now)?;
        if workflow.status == WorkflowStatus::Compensating {
            self.drive_compensation(&mut workflow).await?;
        }
        let events = workflow.take_events();
        self.store.save(&workflow).await?;
        self.publish_all(&events).await;
        Ok(outcome)
    }

    async fn run_next_step_locked(&self, workflow_id: &str) -> Result<StepOutcome, ClientError> {
        let mut workflow = self.workflow(workflow_id).await?;
        let now = self.clock.now_ms();

        if workflow.status == WorkflowStatus::Pending {
            self.execution.saga().start_saga(&mut workflow, now)?;
        }
        if workflow.status != WorkflowStatus::Executing {
            debug!(workflow_id, status = %workflow.status, "workflow not executing; nothing to run");
            return Ok(StepOutcome::Idle);
        }

        let definition = self
            .definitions
            .get(&workflow.definition_id)
            .ok_or_else(|| ClientError::DefinitionNotFound {
                definition_id: workflow.definition_id.clone(),
            })?;

        let Some(step_id) = self.execution.next_step(&workflow, definition) else {
            let events = workflow.take_events();
            if !events.is_empty() {
                self.store.save(&workflow).await?;
                self.publish_all(&events).await;
            }
            return Ok(StepOutcome::Idle);
        };

        workflow.start_step(&step_id, now)?;
        let (service_name, operation, request) = {
            let step = workflow
                .step(&step_id)
                .ok_or_else(|| StateError::step_not_found(&step_id))?;
            let mut request = workflow.input_parameters.clone();
            request.extend(step.input.iter().map(|(k, v)| (k.clone(), v.clone())));
            (step.service_name.clone(), step.operation.clone(), request)
        };

        debug!(workflow_id, step_id = %step_id, service = %service_name, "invoking step");
        let call_result = self.services.call(&service_name, &operation, &request).await;
        let finished_at = self.clock.now_ms();

        let outcome = match call_result {
            Ok(output) => {
                let result = StepResult::success(
                    &step_id,
                    output,
                    finished_at.saturating_sub(now),
                    finished_at,
                );
                let workflow_completed =
                    self.execution
                        .execute_step(&mut workflow, &step_id, result, finished_at)?;
                StepOutcome::Completed {
                    step_id: step_id.clone(),
                    workflow_completed,
                }
            }
            Err(call_error) => {
                let error = call_error.to_workflow_error(&step_id, finished_at);
                let recovery = self.execution.handle_step_failure(
                    &mut workflow,
                    &step_id,
                    error,
                    finished_at,
                )?;
                match recovery {
                    RecoveryOutcome::WillRetry { delay_ms } => StepOutcome::Retrying {
                        step_id: step_id.clone(),
                        delay_ms,
                    },
                    RecoveryOutcome::Failed { .. } => {
                        let compensated = if workflow.status == WorkflowStatus::Compensating {
                            self.drive_compensation(&mut workflow).await?;
                            true
                        } else {
                            false
                        };
                        StepOutcome::Failed {
                            step_id: step_id.clone(),
                            compensated,
                        }
                    }
                }
            }
        };

        let events = workflow.take_events();
        self.store.save(&workflow).await?;
        self.publish_all(&events).await;
        Ok(outcome)
    }

    async fn compensate_workflow_locked(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<bool, ClientError> {
        let mut workflow = self.workflow(workflow_id).await?;
        let now = self.clock.now_ms();
        let error = WorkflowError::new(
            ErrorKind::BusinessRuleViolation,
            "MANUAL_COMPENSATION",
            reason,
            None,
            Some("orchestration-engine".to_string()),
            false,
            now,
        );
        self.execution
            .saga()
            .backward_recovery(&mut workflow, &error, now)?;
        let successful = if workflow.status == WorkflowStatus::Compensating {
            self.drive_compensation(&mut workflow).await?
        } else {
            true
        };
        let events = workflow.take_events();
        self.store.save(&workflow).await?;
        self.publish_all(&events).await;
        Ok(successful)
    }

    /// Execute compensation calls for every step that needs one, newest
    /// first. A step whose compensation exhausts its own retry bound is
    /// recorded as failed and skipped; the remainder still compensates,
    /// and the terminal event reports `successful = false`.
    async fn drive_compensation(&self, workflow: &mut Workflow) -> Result<bool, ClientError> {
        let step_ids: Vec<String> = workflow
            .steps_requiring_compensation()
            .iter()
            .map(|s| s.step_id.clone())
            .collect();
        let mut failed_steps: Vec<String> = Vec::new();

        for step_id in step_ids {
            let action = match workflow.step(&step_id).and_then(|s| s.compensation.clone()) {
                Some(action) => action,
                None => continue,
            };
            workflow.compensate_step(&step_id)?;
            if self.invoke_compensation(&step_id, &action).await {
                let now = self.clock.now_ms();
                workflow.mark_step_compensated(&step_id, now)?;
            } else {
                error!(
                    workflow_id = %workflow.id,
                    step_id = %step_id,
                    "compensation exhausted its retry bound"
                );
                failed_steps.push(step_id);
            }
        }

        let now = self.clock.now_ms();
        if failed_steps.is_empty() {
            workflow.complete_compensation(now)?;
            Ok(true)
        } else {
            workflow.fail_compensation(
                &format!("compensation failed for steps: {}", failed_steps.join(", ")),
                now,
            )?;
            Ok(false)
        }
    }

    /// One compensation call with the action's own retry bound (initial
    /// attempt plus `max_retries` retries). Non-recoverable rejections
    /// stop immediately.
    async fn invoke_compensation(&self, step_id: &str, action: &CompensationAction) -> bool {
        for attempt in 0..=action.max_retries {
            match self
                .services
                .call(&action.service_name, &action.operation, &action.parameters)
                .await
            {
                Ok(_) => {
                    debug!(step_id, attempt, "compensation call succeeded");
                    return true;
                }
                Err(e) => {
                    warn!(step_id, attempt, error = %e, "compensation call failed");
                    if !e.is_recoverable() {
                        return false;
                    }
                }
            }
        }
        false
    }
}
