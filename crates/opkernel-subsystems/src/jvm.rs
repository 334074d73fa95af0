//! JVM definitions - `/jvm=*`
//!
//! Launch settings for a managed JVM: scalar attributes written through the
//! global `write-attribute`, the `jvm-options` list and the
//! `system-properties` object. Pure configuration; no runtime services.

use crate::common::{add_operation_from, add_request, parameters, require_absent, require_resource};
use opkernel_controller::{
    handler_fn, BooleanWriteAttributeHandler, Extension, OperationContext, OperationHandler, RegistrationError,
    RegistryNode, ResultChannel, StaticDescription, Storage, WriteAttributeHandler,
};
use opkernel_core::{
    ModelNode, ModelType, Operation, OperationError, PathAddress, PathElement, Result, ADD, NAME, REMOVE, VALUE,
};
use std::sync::Arc;
use tracing::debug;

pub const JVM: &str = "jvm";

pub const AGENT_LIB: &str = "agent-lib";
pub const AGENT_PATH: &str = "agent-path";
pub const DEBUG_ENABLED: &str = "debug-enabled";
pub const DEBUG_OPTIONS: &str = "debug-options";
pub const ENV_CLASSPATH_IGNORED: &str = "env-classpath-ignored";
pub const ENVIRONMENT_VARIABLES: &str = "environment-variables";
pub const HEAP: &str = "heap";
pub const JAVA_AGENT: &str = "javaagent";
pub const JAVA_HOME: &str = "java-home";
pub const PERMGEN: &str = "permgen";
pub const STACK_SIZE: &str = "stack-size";

pub const JVM_OPTIONS: &str = "jvm-options";
pub const JVM_OPTION: &str = "jvm-option";
pub const SYSTEM_PROPERTIES: &str = "system-properties";

pub const ADD_JVM_OPTION: &str = "add-jvm-option";
pub const REMOVE_JVM_OPTION: &str = "remove-jvm-option";
pub const ADD_SYSTEM_PROPERTY: &str = "add-system-property";
pub const REMOVE_SYSTEM_PROPERTY: &str = "remove-system-property";

const GENERIC_ATTRIBUTES: &[&str] = &[
    AGENT_LIB,
    AGENT_PATH,
    DEBUG_OPTIONS,
    ENVIRONMENT_VARIABLES,
    HEAP,
    JAVA_AGENT,
    JAVA_HOME,
    PERMGEN,
    STACK_SIZE,
];

const BOOLEAN_ATTRIBUTES: &[&str] = &[DEBUG_ENABLED, ENV_CLASSPATH_IGNORED];

/// Everything `add` accepts and `remove` captures.
const ADD_PARAMETERS: &[&str] = &[
    AGENT_LIB,
    AGENT_PATH,
    DEBUG_ENABLED,
    DEBUG_OPTIONS,
    ENV_CLASSPATH_IGNORED,
    ENVIRONMENT_VARIABLES,
    HEAP,
    JAVA_AGENT,
    JAVA_HOME,
    PERMGEN,
    STACK_SIZE,
    JVM_OPTIONS,
    SYSTEM_PROPERTIES,
];

pub struct JvmExtension;

impl Extension for JvmExtension {
    fn name(&self) -> &str {
        JVM
    }

    fn initialize(&self, root: &mut RegistryNode) -> std::result::Result<(), RegistrationError> {
        let jvm = root.register_child(PathElement::wildcard(JVM))?;
        register(jvm)
    }

    fn startup_operations(&self, model: &ModelNode) -> Vec<ModelNode> {
        let Some(jvms) = model.get(JVM) else {
            return Vec::new();
        };
        jvms.keys()
            .into_iter()
            .filter_map(|name| {
                let node = jvms.get(name).filter(|node| node.is_defined())?;
                let address = PathAddress::from(vec![PathElement::new(JVM, name)]);
                Some(add_request(&address, node, ADD_PARAMETERS))
            })
            .collect()
    }
}

/// Register the JVM operations and attributes on `registration`.
pub fn register(registration: &mut RegistryNode) -> std::result::Result<(), RegistrationError> {
    registration.register_operation(ADD, Arc::new(JvmAdd), StaticDescription::shared("Add a JVM definition"), false)?;
    registration.register_operation(
        REMOVE,
        Arc::new(JvmRemove),
        StaticDescription::shared("Remove a JVM definition"),
        false,
    )?;

    let write = WriteAttributeHandler::shared();
    for name in GENERIC_ATTRIBUTES {
        registration.register_attribute(name, None, Some(write.clone()), Storage::Configuration)?;
    }
    let boolean = BooleanWriteAttributeHandler::shared();
    for name in BOOLEAN_ATTRIBUTES {
        registration.register_attribute(name, None, Some(boolean.clone()), Storage::Configuration)?;
    }
    registration.register_attribute(JVM_OPTIONS, None, None, Storage::Configuration)?;
    registration.register_attribute(SYSTEM_PROPERTIES, None, None, Storage::Configuration)?;

    registration.register_operation(
        ADD_JVM_OPTION,
        handler_fn(add_jvm_option),
        option_description("Append a JVM option"),
        false,
    )?;
    registration.register_operation(
        REMOVE_JVM_OPTION,
        handler_fn(remove_jvm_option),
        option_description("Remove every occurrence of a JVM option"),
        false,
    )?;
    registration.register_operation(
        ADD_SYSTEM_PROPERTY,
        handler_fn(add_system_property),
        StaticDescription::shared("Set a system property passed to the JVM"),
        false,
    )?;
    registration.register_operation(
        REMOVE_SYSTEM_PROPERTY,
        handler_fn(remove_system_property),
        StaticDescription::shared("Unset a system property passed to the JVM"),
        false,
    )?;
    Ok(())
}

fn option_description(text: &str) -> Arc<StaticDescription> {
    Arc::new(StaticDescription::from_model(
        ModelNode::new_object().with("description", text).with(
            "request-properties",
            ModelNode::new_object().with(
                JVM_OPTION,
                ModelNode::new_object().with("type", "STRING").with("required", true),
            ),
        ),
    ))
}

// ---------------------------------------------------------------------------
// add / remove
// ---------------------------------------------------------------------------

struct JvmAdd;

#[async_trait::async_trait]
impl OperationHandler for JvmAdd {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_absent(ctx) {
            return results.fail(e);
        }
        let mut model = match parameters(operation.request(), ADD_PARAMETERS) {
            Ok(model) => model,
            Err(e) => return results.fail(e),
        };
        for name in BOOLEAN_ATTRIBUTES {
            if let Some(value) = model.get(name) {
                match value.as_bool() {
                    Ok(flag) => model.set(name, flag),
                    Err(e) => return results.fail(e),
                }
            }
        }
        if let Some(options) = model.get(JVM_OPTIONS) {
            if options.as_list().is_none() {
                return results.fail(OperationError::type_mismatch(ModelType::List, options));
            }
        }
        *ctx.sub_model_mut() = model;
        results.complete(operation.compensating(REMOVE));
    }
}

struct JvmRemove;

#[async_trait::async_trait]
impl OperationHandler for JvmRemove {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let compensating = add_operation_from(operation, ctx.sub_model(), ADD_PARAMETERS);
        *ctx.sub_model_mut() = ModelNode::Undefined;
        results.complete(compensating);
    }
}

// ---------------------------------------------------------------------------
// jvm-options
// ---------------------------------------------------------------------------

fn add_jvm_option(ctx: &mut OperationContext, operation: &Operation) -> Result<ModelNode> {
    require_resource(ctx)?;
    let option = operation.require(JVM_OPTION)?.clone();
    debug!("add jvm option {}", option);
    ctx.sub_model_mut().entry(JVM_OPTIONS).push(option.clone());
    Ok(operation.compensating(REMOVE_JVM_OPTION).with(JVM_OPTION, option))
}

fn remove_jvm_option(ctx: &mut OperationContext, operation: &Operation) -> Result<ModelNode> {
    require_resource(ctx)?;
    let option = operation.require(JVM_OPTION)?.clone();

    let present = ctx
        .sub_model()
        .get(JVM_OPTIONS)
        .and_then(ModelNode::as_list)
        .map(|values| values.contains(&option))
        .unwrap_or(false);
    if !present {
        // nothing to undo
        return Ok(operation.compensating(REMOVE_JVM_OPTION).with(JVM_OPTION, option));
    }

    let sub_model = ctx.sub_model_mut();
    let kept: Vec<ModelNode> = sub_model
        .get(JVM_OPTIONS)
        .and_then(ModelNode::as_list)
        .map(|values| values.iter().filter(|v| **v != option).cloned().collect())
        .unwrap_or_default();
    sub_model.set(JVM_OPTIONS, ModelNode::List(kept));
    Ok(operation.compensating(ADD_JVM_OPTION).with(JVM_OPTION, option))
}

// ---------------------------------------------------------------------------
// system-properties
// ---------------------------------------------------------------------------

fn restore_property(operation: &Operation, name: &str, previous: Option<ModelNode>) -> ModelNode {
    match previous {
        Some(value) => operation
            .compensating(ADD_SYSTEM_PROPERTY)
            .with(NAME, name)
            .with(VALUE, value),
        None => operation.compensating(REMOVE_SYSTEM_PROPERTY).with(NAME, name),
    }
}

fn add_system_property(ctx: &mut OperationContext, operation: &Operation) -> Result<ModelNode> {
    require_resource(ctx)?;
    let name = operation.require(NAME)?.as_string()?;
    let value = operation.get(VALUE).cloned().unwrap_or_default();
    let previous = ctx.sub_model().get(SYSTEM_PROPERTIES).and_then(|p| p.get(&name)).cloned();
    ctx.sub_model_mut().entry(SYSTEM_PROPERTIES).set(&name, value);
    Ok(restore_property(operation, &name, previous))
}

fn remove_system_property(ctx: &mut OperationContext, operation: &Operation) -> Result<ModelNode> {
    require_resource(ctx)?;
    let name = operation.require(NAME)?.as_string()?;
    let Some(previous) = ctx.sub_model().get(SYSTEM_PROPERTIES).and_then(|p| p.get(&name)).cloned() else {
        return Ok(restore_property(operation, &name, None));
    };
    let sub_model = ctx.sub_model_mut();
    let now_empty = match sub_model.get_mut(SYSTEM_PROPERTIES) {
        Some(properties) => {
            properties.remove(&name);
            properties.keys().is_empty()
        }
        None => false,
    };
    if now_empty {
        sub_model.remove(SYSTEM_PROPERTIES);
    }
    Ok(restore_property(operation, &name, Some(previous)))
}
