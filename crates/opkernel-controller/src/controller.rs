//! Model controller - the operation dispatcher.
//!
//! `execute()` validates and routes a request, then hands it to one of two
//! lanes and returns a [`Cancellable`] at once:
//!
//! - writes go to a single writer lane (one task, submission order), so no two
//!   handlers ever mutate the model at the same time;
//! - reads run on their own tasks against a snapshot taken under the read
//!   lock, concurrently with each other and with the writer.
//!
//! A write handler works on a candidate copy of its sub-model. The candidate
//! is swapped into the live tree under the write lock only when the handler
//! completes successfully. Failure, cancellation, a dropped channel or a
//! handler panic discard it and roll back journaled service changes. A write
//! whose parent resource does not exist fails before its handler runs.

use crate::channel::{Cancellable, Completion, OperationState, ResultChannel, StateSender};
use crate::context::OperationContext;
use crate::handler::OperationHandler;
use crate::model;
use crate::persistence::{configuration_view, ConfigurationPersister, NullPersister};
use crate::registry::{OperationEntry, ResourceRegistry};
use crate::service::{InMemoryServiceContainer, ServiceContainer};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use opkernel_core::{ModelNode, Operation, OperationError, PathAddress};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Whether the controller is attached to a running process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerMode {
    /// Handlers get a service target and drive runtime services.
    #[default]
    Runtime,
    /// Offline configuration editing; no runtime services.
    AdminOnly,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub mode: ControllerMode,
    /// Capacity of the writer lane queue.
    pub queue_depth: usize,
    /// Committed writes kept for audit and undo.
    pub history_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: ControllerMode::Runtime,
            queue_depth: 1024,
            history_limit: 256,
        }
    }
}

/// A committed write, with the operation that reverses it.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: ModelNode,
    pub compensating: ModelNode,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("boot operation {index} ({operation}) failed: {error}")]
pub struct BootError {
    pub index: usize,
    pub operation: String,
    pub error: OperationError,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct Job {
    id: Uuid,
    operation: Operation,
    entry: OperationEntry,
    cancel: CancellationToken,
    state: StateSender,
    record: bool,
}

struct Shared {
    registry: Arc<ResourceRegistry>,
    model: RwLock<ModelNode>,
    services: Arc<dyn ServiceContainer>,
    persister: Arc<dyn ConfigurationPersister>,
    history: Mutex<VecDeque<HistoryEntry>>,
    config: ControllerConfig,
}

enum Outcome {
    Done(Completion),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ModelControllerBuilder {
    registry: ResourceRegistry,
    config: ControllerConfig,
    services: Option<Arc<dyn ServiceContainer>>,
    persister: Option<Arc<dyn ConfigurationPersister>>,
    model: ModelNode,
}

impl ModelControllerBuilder {
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mode(mut self, mode: ControllerMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn services(mut self, services: Arc<dyn ServiceContainer>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn persister(mut self, persister: Arc<dyn ConfigurationPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Initial model. Defaults to an empty object.
    pub fn model(mut self, model: ModelNode) -> Self {
        self.model = model;
        self
    }

    /// Freeze the registry and start the writer lane. Must be called inside a
    /// tokio runtime.
    pub fn start(self) -> ModelController {
        let shared = Arc::new(Shared {
            registry: Arc::new(self.registry),
            model: RwLock::new(self.model),
            services: self
                .services
                .unwrap_or_else(|| Arc::new(InMemoryServiceContainer::new())),
            persister: self.persister.unwrap_or_else(|| Arc::new(NullPersister)),
            history: Mutex::new(VecDeque::new()),
            config: self.config,
        });
        let (writer_tx, writer_rx) = mpsc::channel(shared.config.queue_depth.max(1));
        tokio::spawn(writer_lane(shared.clone(), writer_rx));
        info!("ModelController started ({:?} mode)", shared.config.mode);
        ModelController { shared, writer_tx }
    }
}

// ---------------------------------------------------------------------------
// ModelController
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ModelController {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<Job>,
}

impl ModelController {
    pub fn builder(registry: ResourceRegistry) -> ModelControllerBuilder {
        ModelControllerBuilder {
            registry,
            config: ControllerConfig::default(),
            services: None,
            persister: None,
            model: ModelNode::new_object(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.shared.registry
    }

    pub fn mode(&self) -> ControllerMode {
        self.shared.config.mode
    }

    pub fn services(&self) -> &Arc<dyn ServiceContainer> {
        &self.shared.services
    }

    /// Submit an operation. Returns once the operation is queued; the
    /// handler's outcome is observed through the returned token.
    pub async fn execute(&self, request: ModelNode) -> Cancellable {
        self.submit(request, true).await
    }

    /// Submit and wait for the terminal state.
    pub async fn execute_and_wait(&self, request: ModelNode) -> OperationState {
        self.execute(request).await.wait().await
    }

    async fn submit(&self, request: ModelNode, record: bool) -> Cancellable {
        let id = Uuid::new_v4();
        let operation = match Operation::from_request(request) {
            Ok(op) => op,
            Err(e) => {
                warn!("Rejected operation {}: {}", id, e);
                return Cancellable::resolved(id, OperationState::Failed(e));
            }
        };
        let entry = match self.shared.registry.operation(operation.address(), operation.name()) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!("Cannot route {}: {}", operation, e);
                return Cancellable::resolved(id, OperationState::Failed(e));
            }
        };

        let cancel = CancellationToken::new();
        let (state, state_rx) = StateSender::channel();
        let cancellable = Cancellable::new(id, cancel.clone(), state_rx);
        let job = Job {
            id,
            operation,
            entry,
            cancel,
            state,
            record,
        };

        if job.entry.handler.is_read_only() {
            let shared = self.shared.clone();
            tokio::spawn(async move { run_read(&shared, job).await });
        } else if let Err(mpsc::error::SendError(job)) = self.writer_tx.send(job).await {
            job.state.finish(OperationState::Failed(OperationError::handler_failure(
                "controller is shut down",
            )));
        }
        cancellable
    }

    /// Execute boot operations in order, stopping at the first failure.
    pub async fn boot(&self, operations: Vec<ModelNode>) -> Result<usize, BootError> {
        let count = operations.len();
        for (index, request) in operations.into_iter().enumerate() {
            let label = request
                .get(opkernel_core::OP)
                .and_then(ModelNode::as_str)
                .unwrap_or("<unnamed>")
                .to_string();
            match self.execute_and_wait(request).await {
                OperationState::Complete { .. } => {}
                OperationState::Failed(error) => {
                    return Err(BootError {
                        index,
                        operation: label,
                        error,
                    })
                }
                OperationState::Cancelled | OperationState::Pending => {
                    return Err(BootError {
                        index,
                        operation: label,
                        error: OperationError::Contract("boot operation did not complete".to_string()),
                    })
                }
            }
        }
        info!("Boot complete: {} operation(s)", count);
        Ok(count)
    }

    /// Apply the compensating operation of the most recent recorded write.
    /// Returns `None` when the history is empty.
    pub async fn undo_last(&self) -> Option<OperationState> {
        let entry = self.lock_history().pop_back()?;
        if !entry.compensating.is_defined() {
            let error = OperationError::Unsupported("operation has no compensating operation".to_string());
            self.lock_history().push_back(entry);
            return Some(OperationState::Failed(error));
        }
        let state = self.submit(entry.compensating.clone(), false).await.wait().await;
        if !state.is_success() {
            self.lock_history().push_back(entry);
        }
        Some(state)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_history().iter().cloned().collect()
    }

    /// Snapshot of the whole model.
    pub async fn read_model(&self) -> ModelNode {
        self.shared.model.read().await.clone()
    }

    /// Snapshot of the node at `address`.
    pub async fn read_model_at(&self, address: &PathAddress) -> ModelNode {
        model::read_at(&*self.shared.model.read().await, address)
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.shared.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Lanes
// ---------------------------------------------------------------------------

async fn writer_lane(shared: Arc<Shared>, mut rx: mpsc::Receiver<Job>) {
    debug!("Writer lane started");
    while let Some(job) = rx.recv().await {
        let span = info_span!("operation", id = %job.id, op = %job.operation.name(), address = %job.operation.address());
        run_write(&shared, job).instrument(span).await;
    }
    debug!("Writer lane closed");
}

async fn run_write(shared: &Shared, job: Job) {
    if job.cancel.is_cancelled() {
        debug!("Cancelled before start");
        job.state.finish(OperationState::Cancelled);
        return;
    }

    let address = job.operation.address().clone();
    let candidate = {
        let live = shared.model.read().await;
        if let Some(parent) = missing_parent(&live, &address) {
            warn!("Operation {} has no parent resource at {}", job.operation, parent);
            job.state.finish(OperationState::Failed(OperationError::AddressNotFound(parent)));
            return;
        }
        model::read_at(&live, &address)
    };
    let services = match shared.config.mode {
        ControllerMode::Runtime => Some(shared.services.clone()),
        ControllerMode::AdminOnly => None,
    };
    let mutating = Arc::new(AtomicBool::new(false));
    let mut ctx = OperationContext::new(
        address.clone(),
        shared.registry.clone(),
        candidate,
        services,
        true,
        job.cancel.clone(),
        mutating.clone(),
    );

    let outcome = drive(job.entry.handler.as_ref(), &mut ctx, &job.operation, &job.cancel, &mutating).await;
    let (candidate, target) = ctx.into_parts();

    match outcome {
        Outcome::Done(Completion::Success { result, compensating }) => {
            {
                let mut live = shared.model.write().await;
                model::commit_at(&mut live, &address, candidate);
                if let Err(e) = shared.persister.store(&configuration_view(&shared.registry, &live)) {
                    warn!("Failed to persist configuration: {}", e);
                }
            }
            if job.record {
                record(shared, &job, compensating.clone());
            }
            info!("Committed {}", job.operation);
            job.state.finish(OperationState::Complete { result, compensating });
        }
        Outcome::Done(Completion::Failure(error)) => {
            if let Some(target) = target {
                target.rollback().await;
            }
            warn!("Operation {} failed: {}", job.operation, error);
            job.state.finish(OperationState::Failed(error));
        }
        Outcome::Cancelled => {
            if let Some(target) = target {
                target.rollback().await;
            }
            info!("Operation {} cancelled", job.operation);
            job.state.finish(OperationState::Cancelled);
        }
    }
}

async fn run_read(shared: &Shared, job: Job) {
    let span = info_span!("query", id = %job.id, op = %job.operation.name(), address = %job.operation.address());
    async {
        if job.cancel.is_cancelled() {
            job.state.finish(OperationState::Cancelled);
            return;
        }
        let address = job.operation.address().clone();
        let snapshot = model::read_at(&*shared.model.read().await, &address);
        let services = match shared.config.mode {
            ControllerMode::Runtime => Some(shared.services.clone()),
            ControllerMode::AdminOnly => None,
        };
        let mutating = Arc::new(AtomicBool::new(false));
        let mut ctx = OperationContext::new(
            address,
            shared.registry.clone(),
            snapshot,
            services,
            false,
            job.cancel.clone(),
            mutating.clone(),
        );
        let state = match drive(job.entry.handler.as_ref(), &mut ctx, &job.operation, &job.cancel, &mutating).await {
            Outcome::Done(Completion::Success { result, compensating }) => {
                OperationState::Complete { result, compensating }
            }
            Outcome::Done(Completion::Failure(error)) => {
                debug!("Query {} failed: {}", job.operation, error);
                OperationState::Failed(error)
            }
            Outcome::Cancelled => OperationState::Cancelled,
        };
        job.state.finish(state);
    }
    .instrument(span)
    .await
}

/// Run the handler until it reports, honoring cancellation only while the
/// handler has not begun mutating.
async fn drive(
    handler: &dyn OperationHandler,
    ctx: &mut OperationContext,
    operation: &Operation,
    cancel: &CancellationToken,
    mutating: &AtomicBool,
) -> Outcome {
    let (channel, pending) = ResultChannel::new();
    let run = async {
        let executed = AssertUnwindSafe(handler.execute(ctx, operation, channel))
            .catch_unwind()
            .await;
        match executed {
            Ok(()) => pending.wait().await,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Handler for {} panicked: {}", operation, message);
                Completion::Failure(OperationError::Contract(format!("handler panicked: {}", message)))
            }
        }
    };
    tokio::pin!(run);

    let mut ignoring_cancel = false;
    loop {
        tokio::select! {
            completion = &mut run => return Outcome::Done(completion),
            _ = cancel.cancelled(), if !ignoring_cancel => {
                if mutating.load(Ordering::SeqCst) {
                    debug!("Cancellation ignored: mutation already begun");
                    ignoring_cancel = true;
                } else {
                    return Outcome::Cancelled;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The shallowest ancestor of `address` with no resource in `root`. Writes
/// never create parents implicitly.
fn missing_parent(root: &ModelNode, address: &PathAddress) -> Option<PathAddress> {
    let (_, parents) = address.elements().split_last()?;
    (1..=parents.len())
        .map(|depth| PathAddress::from(parents[..depth].to_vec()))
        .find(|ancestor| !model::read_at(root, ancestor).is_defined())
}

fn record(shared: &Shared, job: &Job, compensating: ModelNode) {
    let mut history = shared.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    history.push_back(HistoryEntry {
        id: job.id,
        timestamp: Utc::now(),
        operation: job.operation.request().clone(),
        compensating,
    });
    while history.len() > shared.config.history_limit {
        history.pop_front();
    }
}
