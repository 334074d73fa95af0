//! Error types for operation execution

use crate::address::PathAddress;
use crate::value::{ModelNode, ModelType};
use thiserror::Error;

/// Every way an operation can fail. All variants reach the submitter through
/// the failure path of the result channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("malformed operation: {0}")]
    Malformed(String),

    #[error("address not found: {0}")]
    AddressNotFound(PathAddress),

    #[error("unknown operation '{name}' at {address}")]
    UnknownOperation { name: String, address: PathAddress },

    #[error("unknown attribute '{name}' at {address}")]
    UnknownAttribute { name: String, address: PathAddress },

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: ModelType, actual: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("operation failed: {0}")]
    HandlerFailure(String),

    #[error("service installation failed: {0}")]
    ServiceInstall(String),

    #[error("handler contract violated: {0}")]
    Contract(String),
}

pub type Result<T> = std::result::Result<T, OperationError>;

impl OperationError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn unknown_operation(name: impl Into<String>, address: &PathAddress) -> Self {
        Self::UnknownOperation {
            name: name.into(),
            address: address.clone(),
        }
    }

    pub fn unknown_attribute(name: impl Into<String>, address: &PathAddress) -> Self {
        Self::UnknownAttribute {
            name: name.into(),
            address: address.clone(),
        }
    }

    pub fn type_mismatch(expected: ModelType, actual: &ModelNode) -> Self {
        Self::TypeMismatch {
            expected,
            actual: format!("{} ({})", actual, actual.model_type()),
        }
    }

    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self::HandlerFailure(message.into())
    }

    pub fn service_install(message: impl Into<String>) -> Self {
        Self::ServiceInstall(message.into())
    }

    /// True for routing and validation failures raised before any handler ran.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::AddressNotFound(_) | Self::UnknownOperation { .. }
        )
    }
}
