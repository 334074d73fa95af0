//! Helpers shared by the subsystem handlers.

use opkernel_controller::{
    OperationContext, OperationHandler, ResultChannel, ServiceError,
};
use opkernel_core::{
    operation_for, ModelNode, Operation, OperationError, PathAddress, PathElement, Result, ADD, OP, OP_ADDR, REMOVE,
};
use std::sync::Arc;

pub(crate) const SUBSYSTEM: &str = "subsystem";

/// The resource at the context's address must exist.
pub(crate) fn require_resource(ctx: &OperationContext) -> Result<()> {
    if ctx.sub_model().is_defined() {
        Ok(())
    } else {
        Err(OperationError::AddressNotFound(ctx.address().clone()))
    }
}

/// The resource at the context's address must not exist yet.
pub(crate) fn require_absent(ctx: &OperationContext) -> Result<()> {
    if ctx.sub_model().is_defined() {
        Err(OperationError::handler_failure(format!("{} already exists", ctx.address())))
    } else {
        Ok(())
    }
}

pub(crate) fn service_failure(e: ServiceError) -> OperationError {
    OperationError::service_install(e.to_string())
}

/// Optional string parameter.
pub(crate) fn optional_string(operation: &Operation, key: &str) -> Result<Option<String>> {
    match operation.get(key) {
        Some(value) if value.is_defined() => value.as_string().map(Some),
        _ => Ok(None),
    }
}

/// Copy every parameter of `request` into a fresh model object, rejecting
/// names not in `allowed`.
pub(crate) fn parameters(request: &ModelNode, allowed: &[&str]) -> Result<ModelNode> {
    let mut out = ModelNode::new_object();
    for key in request.keys() {
        if key == OP || key == OP_ADDR {
            continue;
        }
        if !allowed.contains(&key) {
            return Err(OperationError::malformed(format!("unknown parameter '{}'", key)));
        }
        if let Some(value) = request.get(key).filter(|v| v.is_defined()) {
            out.set(key, value.clone());
        }
    }
    Ok(out)
}

/// Turn a resource's attributes back into the parameters of an `add`.
pub(crate) fn add_operation_from(operation: &Operation, model: &ModelNode, attributes: &[&str]) -> ModelNode {
    add_request(operation.address(), model, attributes)
}

/// `add` at `address` carrying the defined `attributes` of `model`.
pub(crate) fn add_request(address: &PathAddress, model: &ModelNode, attributes: &[&str]) -> ModelNode {
    let mut add = operation_for(ADD, address);
    for key in attributes {
        if let Some(value) = model.get(key).filter(|v| v.is_defined()) {
            add.set(key, value.clone());
        }
    }
    add
}

/// The node of the concrete subsystem resource `name`, when configured.
pub(crate) fn subsystem<'a>(model: &'a ModelNode, name: &str) -> Option<&'a ModelNode> {
    model.get(SUBSYSTEM).and_then(|s| s.get(name)).filter(|node| node.is_defined())
}

pub(crate) fn subsystem_address(name: &str) -> PathAddress {
    PathAddress::from(vec![PathElement::new(SUBSYSTEM, name)])
}

// ---------------------------------------------------------------------------
// Plain subsystem add/remove
// ---------------------------------------------------------------------------

/// Creates an empty subsystem resource.
pub(crate) struct SubsystemAdd;

#[async_trait::async_trait]
impl OperationHandler for SubsystemAdd {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_absent(ctx) {
            return results.fail(e);
        }
        *ctx.sub_model_mut() = ModelNode::new_object();
        results.complete(operation.compensating(REMOVE));
    }
}

/// Removes a subsystem resource, refusing while any of `blocking` is still
/// configured on it.
pub(crate) struct SubsystemRemove {
    pub(crate) blocking: &'static [&'static str],
}

impl SubsystemRemove {
    pub(crate) fn shared(blocking: &'static [&'static str]) -> Arc<dyn OperationHandler> {
        Arc::new(Self { blocking })
    }
}

#[async_trait::async_trait]
impl OperationHandler for SubsystemRemove {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        if let Some(key) = self.blocking.iter().find(|key| {
            ctx.sub_model()
                .get(key)
                .map(|v| v.is_defined() && v.as_object().map(|m| !m.is_empty()).unwrap_or(true))
                .unwrap_or(false)
        }) {
            return results.fail(OperationError::handler_failure(format!(
                "cannot remove {}: '{}' is still configured",
                ctx.address(),
                key
            )));
        }
        *ctx.sub_model_mut() = ModelNode::Undefined;
        results.complete(operation.compensating(ADD));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_rejects_unknown_keys() {
        let request = ModelNode::new_object()
            .with(OP, "add")
            .with(OP_ADDR, "/jvm=default")
            .with("heap", "512m")
            .with("colour", "blue");
        assert!(matches!(parameters(&request, &["heap"]), Err(OperationError::Malformed(_))));
    }

    #[test]
    fn parameters_skips_undefined() {
        let request = ModelNode::new_object()
            .with(OP, "add")
            .with(OP_ADDR, "/jvm=default")
            .with("heap", ModelNode::Undefined)
            .with("stack-size", "1m");
        let params = parameters(&request, &["heap", "stack-size"]).unwrap();
        assert_eq!(params.keys(), vec!["stack-size"]);
    }
}
