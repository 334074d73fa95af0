//! Attribute write handlers - generic and boolean
//!
//! Both are registered as the write half of an attribute and invoked through
//! the global `write-attribute` operation, which builds the real compensating
//! operation. On their own they complete with an undefined placeholder.

use crate::channel::ResultChannel;
use crate::context::OperationContext;
use crate::handler::OperationHandler;
use opkernel_core::{ModelNode, ModelType, Operation, OperationError, NAME, VALUE};
use std::sync::Arc;
use tracing::debug;

fn attribute_name(operation: &Operation) -> Result<String, OperationError> {
    operation.require(NAME)?.as_string()
}

/// Store `value` under `name`, or drop the key when the value is undefined.
fn store(ctx: &mut OperationContext, name: &str, value: ModelNode) {
    let sub_model = ctx.sub_model_mut();
    if value.is_defined() {
        sub_model.set(name, value);
    } else {
        sub_model.remove(name);
    }
}

/// Writes the request's `value` verbatim, optionally coerced to a declared
/// type first.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteAttributeHandler {
    expected: Option<ModelType>,
}

impl WriteAttributeHandler {
    pub fn new() -> Self {
        Self { expected: None }
    }

    pub fn typed(expected: ModelType) -> Self {
        Self {
            expected: Some(expected),
        }
    }

    pub fn shared() -> Arc<dyn OperationHandler> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl OperationHandler for WriteAttributeHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let name = match attribute_name(operation) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let value = operation.get(VALUE).cloned().unwrap_or_default();
        let value = match self.expected {
            Some(expected) => match value.coerce(expected) {
                Ok(value) => value,
                Err(e) => return results.fail(e),
            },
            None => value,
        };
        debug!("write {} = {}", name, value);
        store(ctx, &name, value);
        results.complete(ModelNode::Undefined);
    }
}

/// Accepts only values that coerce to a boolean.
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanWriteAttributeHandler;

impl BooleanWriteAttributeHandler {
    pub fn shared() -> Arc<dyn OperationHandler> {
        Arc::new(Self)
    }
}

#[async_trait::async_trait]
impl OperationHandler for BooleanWriteAttributeHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let name = match attribute_name(operation) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let value = match operation.get(VALUE) {
            Some(value) if value.is_defined() => match value.as_bool() {
                Ok(flag) => ModelNode::Boolean(flag),
                Err(e) => return results.fail(e),
            },
            _ => ModelNode::Undefined,
        };
        store(ctx, &name, value);
        results.complete(ModelNode::Undefined);
    }
}
