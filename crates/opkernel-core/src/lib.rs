//! opkernel core - value tree, path addresses, operation requests, errors

pub mod address;
pub mod error;
pub mod operation;
pub mod value;

pub use address::{PathAddress, PathElement, WILDCARD};
pub use error::{OperationError, Result};
pub use operation::*;
pub use value::{ModelNode, ModelType, BYTES_VALUE};
