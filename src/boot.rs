//! Boot operations and result rendering
//!
//! A boot file is a JSON array of operation requests, applied in order.

use opkernel_controller::{BootError, ModelController, OperationState};
use opkernel_core::ModelNode;
use serde_json::{json, Value};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootFileError {
    #[error("cannot read boot file: {0}")]
    Io(#[from] std::io::Error),

    #[error("boot file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("boot file must be a JSON array of operations")]
    NotAList,
}

/// Ordered list of boot operation requests.
#[derive(Debug, Clone, Default)]
pub struct BootOperations(Vec<ModelNode>);

impl BootOperations {
    pub fn load(path: &Path) -> Result<Self, BootFileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, BootFileError> {
        match serde_json::from_str::<ModelNode>(content)? {
            ModelNode::List(operations) => Ok(Self(operations)),
            _ => Err(BootFileError::NotAList),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<ModelNode> {
        self.0
    }
}

/// Rebuild a persisted configuration snapshot on a freshly started
/// controller by replaying it as operations, so runtime services come back
/// along with the model. Returns the number of operations applied.
pub async fn restore_snapshot(controller: &ModelController, snapshot: &ModelNode) -> Result<usize, BootError> {
    let operations = opkernel_subsystems::startup_operations(snapshot);
    tracing::info!("Restoring snapshot with {} operation(s)", operations.len());
    controller.boot(operations).await
}

/// Render a terminal state the way management clients expect it:
/// `outcome` plus `result`/`compensating-operation` or
/// `failure-description`.
pub fn render_state(state: &OperationState) -> Value {
    match state {
        OperationState::Complete { result, compensating } => json!({
            "outcome": "success",
            "result": Value::from(result),
            "compensating-operation": Value::from(compensating),
        }),
        OperationState::Failed(error) => json!({
            "outcome": "failed",
            "failure-description": error.to_string(),
        }),
        OperationState::Cancelled => json!({ "outcome": "cancelled" }),
        OperationState::Pending => json!({ "outcome": "pending" }),
    }
}
