//! Result channel and cancellation token.
//!
//! A handler receives a [`ResultChannel`] and reports exactly once through it:
//! `complete` or `fail` consume the channel, so a second report cannot be
//! written. The submitter holds a [`Cancellable`] that observes the
//! operation's [`OperationState`] and can request cancellation.

use opkernel_core::{ModelNode, OperationError, Result};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Operation state - the submitter-facing state machine
// ---------------------------------------------------------------------------

/// `Pending → {Complete, Failed, Cancelled}`. Terminal states are final.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationState {
    Pending,
    Complete {
        /// Handler-specific result payload (undefined for most writes).
        result: ModelNode,
        /// The operation that reverses this one.
        compensating: ModelNode,
    },
    Failed(OperationError),
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn result(&self) -> Option<&ModelNode> {
        match self {
            Self::Complete { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn compensating(&self) -> Option<&ModelNode> {
        match self {
            Self::Complete { compensating, .. } => Some(compensating),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&OperationError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handler side
// ---------------------------------------------------------------------------

/// What a handler reported.
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Success { result: ModelNode, compensating: ModelNode },
    Failure(OperationError),
}

/// One-shot reporting channel handed to an operation handler.
#[derive(Debug)]
pub struct ResultChannel {
    tx: oneshot::Sender<Completion>,
}

impl ResultChannel {
    /// A fresh channel plus the receiving end. Handlers that delegate to
    /// another handler create one of these for the nested call.
    pub fn new() -> (Self, PendingResult) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, PendingResult { rx })
    }

    /// Report success with the compensating operation.
    pub fn complete(self, compensating: ModelNode) {
        self.complete_with_result(ModelNode::Undefined, compensating);
    }

    /// Report success carrying a result payload (queries).
    pub fn complete_with_result(self, result: ModelNode, compensating: ModelNode) {
        let _ = self.tx.send(Completion::Success { result, compensating });
    }

    /// Report failure. The handler must not have mutated anything it cannot
    /// hand back; the dispatcher discards the candidate sub-model.
    pub fn fail(self, error: OperationError) {
        let _ = self.tx.send(Completion::Failure(error));
    }

    /// `Ok(compensating)` completes, `Err` fails.
    pub fn report(self, outcome: Result<ModelNode>) {
        match outcome {
            Ok(compensating) => self.complete(compensating),
            Err(e) => self.fail(e),
        }
    }
}

/// Receiving end of a [`ResultChannel`].
#[derive(Debug)]
pub struct PendingResult {
    rx: oneshot::Receiver<Completion>,
}

impl PendingResult {
    /// Wait for the handler's report. A channel dropped without a report is a
    /// contract violation and comes back as a failure.
    pub async fn wait(self) -> Completion {
        match self.rx.await {
            Ok(completion) => completion,
            Err(_) => Completion::Failure(OperationError::Contract(
                "handler finished without reporting a result".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Submitter side
// ---------------------------------------------------------------------------

/// Token handed back from dispatch. Cloneable; all clones observe the same
/// operation.
#[derive(Clone, Debug)]
pub struct Cancellable {
    id: Uuid,
    cancel: CancellationToken,
    state: watch::Receiver<OperationState>,
}

impl Cancellable {
    pub(crate) fn new(id: Uuid, cancel: CancellationToken, state: watch::Receiver<OperationState>) -> Self {
        Self { id, cancel, state }
    }

    /// A token for an operation that never reached a handler.
    pub(crate) fn resolved(id: Uuid, state: OperationState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self {
            id,
            cancel: CancellationToken::new(),
            state: rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask for the operation to stop. Work not yet started is skipped; a
    /// handler that has already begun mutating runs to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current state without waiting.
    pub fn state(&self) -> OperationState {
        self.state.borrow().clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(&self) -> OperationState {
        let mut rx = self.state.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                let state = rx.borrow().clone();
                if state.is_terminal() {
                    return state;
                }
                return OperationState::Failed(OperationError::Contract(
                    "operation dropped by the controller".to_string(),
                ));
            }
        }
    }
}

/// Dispatcher-side writer for an operation's state.
#[derive(Debug)]
pub(crate) struct StateSender {
    tx: watch::Sender<OperationState>,
}

impl StateSender {
    pub(crate) fn channel() -> (Self, watch::Receiver<OperationState>) {
        let (tx, rx) = watch::channel(OperationState::Pending);
        (Self { tx }, rx)
    }

    /// Move to a terminal state. Ignored once terminal.
    pub(crate) fn finish(&self, state: OperationState) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
