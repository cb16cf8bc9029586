//! Background runtime: the waveless dispatcher and the load monitor.
//!
//! `Runtime::start` spawns both loops as tokio tasks and hands back an
//! `Arc<Runtime>`; `shutdown()` signals them and joins. The loops keep no
//! state of their own outside the store — they can be killed and
//! restarted at any point.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::balancer::LoadBalancer;
use crate::client::Client;
use crate::domain::waveless::WavelessPolicy;
use crate::providers::{Clock, EventPublisher, WorkflowStore};

mod janitor;
mod load_monitor;
mod waveless;

/// Tunables for the background loops.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Waveless batching/interval policy.
    pub waveless: WavelessPolicy,
    /// Load-monitor evaluation interval.
    pub monitor_interval_ms: u64,
    /// Janitor sweep interval (workflow and step timeout enforcement).
    pub janitor_interval_ms: u64,
    /// Wall-clock budget used when checking workflow timeouts.
    pub workflow_budget_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            waveless: WavelessPolicy::default(),
            monitor_interval_ms: 5_000,
            janitor_interval_ms: 10_000,
            workflow_budget_ms: 300_000,
        }
    }
}

/// Owns the scheduler and monitor tasks.
pub struct Runtime {
    client: Arc<Client>,
    store: Arc<dyn WorkflowStore>,
    publisher: Arc<dyn EventPublisher>,
    balancer: Arc<LoadBalancer>,
    clock: Arc<dyn Clock>,
    options: RuntimeOptions,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Spawn the waveless dispatcher and load monitor.
    pub async fn start(
        client: Arc<Client>,
        store: Arc<dyn WorkflowStore>,
        publisher: Arc<dyn EventPublisher>,
        balancer: Arc<LoadBalancer>,
        clock: Arc<dyn Clock>,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runtime = Arc::new(Self {
            client,
            store,
            publisher,
            balancer,
            clock,
            options,
            shutdown_tx,
            joins: Mutex::new(Vec::new()),
        });

        let dispatcher = tokio::spawn(waveless::run(runtime.clone(), shutdown_rx.clone()));
        let monitor = tokio::spawn(load_monitor::run(runtime.clone(), shutdown_rx.clone()));
        let sweeper = tokio::spawn(janitor::run(runtime.clone(), shutdown_rx));
        runtime.joins.lock().await.extend([dispatcher, monitor, sweeper]);

        info!("runtime started (waveless dispatcher + load monitor + janitor)");
        runtime
    }

    /// Signal both loops and wait for them to finish.
    pub async fn shutdown(self: Arc<Self>) {
        info!("runtime shutting down");
        let _ = self.shutdown_tx.send(true);
        let joins: Vec<JoinHandle<()>> = self.joins.lock().await.drain(..).collect();
        join_all(joins).await;
        info!("runtime stopped");
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub(crate) fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub(crate) fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn options(&self) -> &RuntimeOptions {
        &self.options
    }
}
