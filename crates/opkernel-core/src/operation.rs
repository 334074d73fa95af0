//! Operation requests and the helpers handlers use to build compensating
//! operations.

use crate::address::PathAddress;
use crate::error::{OperationError, Result};
use crate::value::ModelNode;
use std::sync::Arc;

// Well-known request fields
pub const OP: &str = "operation";
pub const OP_ADDR: &str = "address";
pub const NAME: &str = "name";
pub const VALUE: &str = "value";
pub const RECURSIVE: &str = "recursive";
pub const CHILD_TYPE: &str = "child-type";
pub const LOCALE: &str = "locale";

// Common operation names
pub const ADD: &str = "add";
pub const REMOVE: &str = "remove";
pub const READ_RESOURCE: &str = "read-resource";
pub const READ_ATTRIBUTE: &str = "read-attribute";
pub const WRITE_ATTRIBUTE: &str = "write-attribute";
pub const READ_OPERATION_NAMES: &str = "read-operation-names";
pub const READ_OPERATION_DESCRIPTION: &str = "read-operation-description";
pub const READ_CHILDREN_NAMES: &str = "read-children-names";

/// Build a request with just the operation name and address set.
pub fn operation_for(name: &str, address: &PathAddress) -> ModelNode {
    ModelNode::new_object()
        .with(OP, name)
        .with(OP_ADDR, address.to_model())
}

/// A submitted, validated operation request.
///
/// The request is frozen on construction: it sits behind an `Arc` and only
/// shared references are handed out, so nothing can change it after
/// submission.
#[derive(Clone, Debug)]
pub struct Operation {
    request: Arc<ModelNode>,
    name: String,
    address: PathAddress,
}

impl Operation {
    /// Validate the request shape: an object carrying a non-empty string
    /// `operation` and a well-formed, fully concrete `address`.
    pub fn from_request(request: ModelNode) -> Result<Self> {
        if !matches!(request, ModelNode::Object(_)) {
            return Err(OperationError::malformed(format!(
                "request must be an object, got {}",
                request.model_type()
            )));
        }
        let name = match request.get(OP) {
            Some(ModelNode::String(name)) if !name.trim().is_empty() => name.clone(),
            Some(ModelNode::String(_)) => return Err(OperationError::malformed("empty operation name")),
            Some(other) if other.is_defined() => {
                return Err(OperationError::malformed(format!(
                    "operation name must be a string, got {}",
                    other.model_type()
                )))
            }
            _ => return Err(OperationError::malformed("missing operation name")),
        };
        let address = match request.get(OP_ADDR) {
            Some(node) if node.is_defined() => PathAddress::from_model(node)?,
            _ => return Err(OperationError::malformed("missing operation address")),
        };
        if !address.is_concrete() {
            return Err(OperationError::malformed(format!(
                "operation address must not contain wildcards: {}",
                address
            )));
        }
        Ok(Self {
            request: Arc::new(request),
            name,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    pub fn request(&self) -> &ModelNode {
        &self.request
    }

    pub fn get(&self, key: &str) -> Option<&ModelNode> {
        self.request.get(key)
    }

    pub fn has_defined(&self, key: &str) -> bool {
        self.request.has_defined(key)
    }

    pub fn require(&self, key: &str) -> Result<&ModelNode> {
        self.request.require(key)
    }

    /// A bare request for `name` at this operation's address, the starting
    /// point for a compensating operation.
    pub fn compensating(&self, name: &str) -> ModelNode {
        operation_for(name, &self.address)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.name)
    }
}
