//! Global operations - registered once at the root and inherited by every
//! address below it.

use crate::channel::{Completion, ResultChannel};
use crate::context::OperationContext;
use crate::handler::{OperationHandler, StaticDescription};
use crate::model;
use crate::registry::{RegistrationError, RegistryNode, Storage};
use opkernel_core::{
    ModelNode, Operation, OperationError, CHILD_TYPE, LOCALE, NAME, READ_ATTRIBUTE, READ_CHILDREN_NAMES,
    READ_OPERATION_DESCRIPTION, READ_OPERATION_NAMES, READ_RESOURCE, RECURSIVE, VALUE, WRITE_ATTRIBUTE,
};
use std::sync::Arc;
use tracing::debug;

/// `include-runtime` parameter of `read-resource`.
pub const INCLUDE_RUNTIME: &str = "include-runtime";

/// Register the global operation set on `root`.
pub fn register_global_operations(root: &mut RegistryNode) -> Result<(), RegistrationError> {
    root.register_operation(
        READ_RESOURCE,
        Arc::new(ReadResourceHandler),
        StaticDescription::shared("Read the model of a resource, optionally including its children recursively"),
        true,
    )?;
    root.register_operation(
        READ_ATTRIBUTE,
        Arc::new(ReadAttributeHandler),
        StaticDescription::shared("Read the value of a single attribute"),
        true,
    )?;
    root.register_operation(
        WRITE_ATTRIBUTE,
        Arc::new(WriteAttributeOperation),
        StaticDescription::shared("Write the value of a single attribute"),
        true,
    )?;
    root.register_operation(
        READ_OPERATION_NAMES,
        Arc::new(ReadOperationNamesHandler),
        StaticDescription::shared("List the operations callable at an address"),
        true,
    )?;
    root.register_operation(
        READ_OPERATION_DESCRIPTION,
        Arc::new(ReadOperationDescriptionHandler),
        StaticDescription::shared("Describe an operation callable at an address"),
        true,
    )?;
    root.register_operation(
        READ_CHILDREN_NAMES,
        Arc::new(ReadChildrenNamesHandler),
        StaticDescription::shared("List the names of the children of a given type"),
        true,
    )?;
    Ok(())
}

/// A non-root address whose sub-model is undefined names no resource.
fn require_resource(ctx: &OperationContext) -> Result<(), OperationError> {
    if ctx.address().is_root() || ctx.sub_model().is_defined() {
        Ok(())
    } else {
        Err(OperationError::AddressNotFound(ctx.address().clone()))
    }
}

/// Optional boolean parameter; absent or undefined reads as false.
fn flag(operation: &Operation, name: &str) -> Result<bool, OperationError> {
    match operation.get(name).filter(|v| v.is_defined()) {
        Some(value) => value.as_bool(),
        None => Ok(false),
    }
}

/// Run `handler` against the same context with a nested channel and wait
/// for its report.
async fn delegate(
    handler: &dyn OperationHandler,
    ctx: &mut OperationContext,
    operation: &Operation,
) -> Completion {
    let (channel, pending) = ResultChannel::new();
    handler.execute(ctx, operation, channel).await;
    pending.wait().await
}

// ---------------------------------------------------------------------------
// read-resource
// ---------------------------------------------------------------------------

pub struct ReadResourceHandler;

impl ReadResourceHandler {
    /// Children collapsed to `name => undefined` unless `recursive`.
    fn render(registration: &RegistryNode, node: &ModelNode, recursive: bool) -> ModelNode {
        if recursive {
            return node.clone();
        }
        let Some(map) = node.as_object() else {
            return node.clone();
        };
        let mut out = ModelNode::new_object();
        for (key, value) in map {
            if registration.has_child_type(key) {
                let mut names = ModelNode::new_object();
                for name in value.keys() {
                    names.set(name, ModelNode::Undefined);
                }
                out.set(key, names);
            } else {
                out.set(key, value.clone());
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl OperationHandler for ReadResourceHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let (recursive, include_runtime) = match (flag(operation, RECURSIVE), flag(operation, INCLUDE_RUNTIME)) {
            (Ok(recursive), Ok(include_runtime)) => (recursive, include_runtime),
            (Err(e), _) | (_, Err(e)) => return results.fail(e),
        };

        let registration = match ctx.registration() {
            Ok(registration) => registration,
            Err(e) => return results.fail(e),
        };
        let mut result = Self::render(registration, ctx.sub_model(), recursive);

        if include_runtime {
            let runtime: Vec<(String, Arc<dyn OperationHandler>)> = registration
                .attributes()
                .filter(|(_, access)| access.storage == Storage::Runtime)
                .filter_map(|(name, access)| access.read.clone().map(|read| (name.to_string(), read)))
                .collect();
            for (name, read) in runtime {
                let request = operation.compensating(READ_ATTRIBUTE).with(NAME, name.as_str());
                let nested = match Operation::from_request(request) {
                    Ok(op) => op,
                    Err(e) => return results.fail(e),
                };
                match delegate(read.as_ref(), ctx, &nested).await {
                    Completion::Success { result: value, .. } => result.set(&name, value),
                    Completion::Failure(e) => debug!("runtime attribute {} unavailable: {}", name, e),
                }
            }
        }
        results.complete_with_result(result, ModelNode::Undefined);
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// read-attribute / write-attribute
// ---------------------------------------------------------------------------

pub struct ReadAttributeHandler;

#[async_trait::async_trait]
impl OperationHandler for ReadAttributeHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let name = match operation.require(NAME).and_then(ModelNode::as_string) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let access = match ctx.registration() {
            Ok(registration) => registration.attribute(&name).cloned(),
            Err(e) => return results.fail(e),
        };
        match access {
            Some(access) => match access.read {
                Some(read) => match delegate(read.as_ref(), ctx, operation).await {
                    Completion::Success { result, .. } => results.complete_with_result(result, ModelNode::Undefined),
                    Completion::Failure(e) => results.fail(e),
                },
                None => {
                    let value = ctx.sub_model().get(&name).cloned().unwrap_or_default();
                    results.complete_with_result(value, ModelNode::Undefined)
                }
            },
            None => match ctx.sub_model().get(&name) {
                Some(value) => results.complete_with_result(value.clone(), ModelNode::Undefined),
                None => results.fail(OperationError::unknown_attribute(name, ctx.address())),
            },
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Delegates to the attribute's registered write handler and completes with
/// `write-attribute(name, <previous value>)`.
pub struct WriteAttributeOperation;

#[async_trait::async_trait]
impl OperationHandler for WriteAttributeOperation {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let name = match operation.require(NAME).and_then(ModelNode::as_string) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let access = match ctx.registration() {
            Ok(registration) => registration.attribute(&name).cloned(),
            Err(e) => return results.fail(e),
        };
        let Some(access) = access else {
            return results.fail(OperationError::unknown_attribute(name, ctx.address()));
        };
        let Some(write) = access.write else {
            return results.fail(OperationError::Unsupported(format!(
                "attribute '{}' at {} is read-only",
                name,
                ctx.address()
            )));
        };

        let previous = ctx.sub_model().get(&name).cloned().unwrap_or_default();
        match delegate(write.as_ref(), ctx, operation).await {
            Completion::Success { result, .. } => {
                let compensating = operation
                    .compensating(WRITE_ATTRIBUTE)
                    .with(NAME, name.as_str())
                    .with(VALUE, previous);
                results.complete_with_result(result, compensating);
            }
            Completion::Failure(e) => results.fail(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

pub struct ReadOperationNamesHandler;

#[async_trait::async_trait]
impl OperationHandler for ReadOperationNamesHandler {
    async fn execute(&self, ctx: &mut OperationContext, _operation: &Operation, results: ResultChannel) {
        match ctx.registry().operation_names_at(ctx.address()) {
            Ok(names) => results.complete_with_result(
                ModelNode::List(names.into_iter().map(ModelNode::from).collect()),
                ModelNode::Undefined,
            ),
            Err(e) => results.fail(e),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

pub struct ReadOperationDescriptionHandler;

#[async_trait::async_trait]
impl OperationHandler for ReadOperationDescriptionHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let name = match operation.require(NAME).and_then(ModelNode::as_string) {
            Ok(name) => name,
            Err(e) => return results.fail(e),
        };
        let locale = operation.get(LOCALE).and_then(ModelNode::as_str);
        match ctx.registry().operation(ctx.address(), &name) {
            Ok(entry) => results.complete_with_result(entry.description.description(locale), ModelNode::Undefined),
            Err(e) => results.fail(e),
        }
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

pub struct ReadChildrenNamesHandler;

#[async_trait::async_trait]
impl OperationHandler for ReadChildrenNamesHandler {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        let child_type = match operation.require(CHILD_TYPE).and_then(ModelNode::as_string) {
            Ok(child_type) => child_type,
            Err(e) => return results.fail(e),
        };
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let known = match ctx.registration() {
            Ok(registration) => registration.has_child_type(&child_type),
            Err(e) => return results.fail(e),
        };
        if !known {
            return results.fail(OperationError::malformed(format!(
                "no child type '{}' at {}",
                child_type,
                ctx.address()
            )));
        }
        let names = model::child_names(ctx.sub_model(), &child_type);
        results.complete_with_result(
            ModelNode::List(names.into_iter().map(ModelNode::from).collect()),
            ModelNode::Undefined,
        );
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
