//! JMX subsystem - `/subsystem=jmx`
//!
//! A single remote connector, defined by the socket bindings it listens on.

use crate::common::{require_resource, service_failure, subsystem, subsystem_address, SubsystemAdd, SubsystemRemove};
use opkernel_controller::{
    Extension, OperationContext, OperationHandler, RegistrationError, RegistryNode, ResultChannel, Service,
    ServiceError, ServiceName, StaticDescription, Storage,
};
use opkernel_core::{operation_for, ModelNode, Operation, OperationError, PathElement, ADD, REMOVE};
use std::sync::Arc;
use tracing::info;

pub const JMX: &str = "jmx";

pub const SERVER_BINDING: &str = "server-binding";
pub const REGISTRY_BINDING: &str = "registry-binding";

pub const ADD_CONNECTOR: &str = "add-connector";
pub const REMOVE_CONNECTOR: &str = "remove-connector";

pub fn connector_service() -> ServiceName {
    ServiceName::new(JMX).append("connector")
}

pub struct JmxConnectorService {
    server_binding: String,
    registry_binding: String,
}

impl JmxConnectorService {
    pub fn new(server_binding: impl Into<String>, registry_binding: impl Into<String>) -> Self {
        Self {
            server_binding: server_binding.into(),
            registry_binding: registry_binding.into(),
        }
    }
}

#[async_trait::async_trait]
impl Service for JmxConnectorService {
    async fn start(&self) -> Result<(), ServiceError> {
        if self.server_binding.is_empty() || self.registry_binding.is_empty() {
            return Err(ServiceError::failed("connector bindings must not be empty"));
        }
        info!(
            "JMX connector listening (server={}, registry={})",
            self.server_binding, self.registry_binding
        );
        Ok(())
    }

    async fn stop(&self) {
        info!("JMX connector stopped");
    }

    fn status(&self) -> ModelNode {
        ModelNode::new_object()
            .with(SERVER_BINDING, self.server_binding.as_str())
            .with(REGISTRY_BINDING, self.registry_binding.as_str())
    }
}

pub struct JmxExtension;

impl Extension for JmxExtension {
    fn name(&self) -> &str {
        JMX
    }

    fn initialize(&self, root: &mut RegistryNode) -> Result<(), RegistrationError> {
        let subsystem = root.register_child(PathElement::new("subsystem", JMX))?;
        subsystem.register_operation(ADD, Arc::new(SubsystemAdd), StaticDescription::shared("Add the JMX subsystem"), false)?;
        subsystem.register_operation(
            REMOVE,
            SubsystemRemove::shared(&[SERVER_BINDING]),
            StaticDescription::shared("Remove the JMX subsystem"),
            false,
        )?;
        subsystem.register_operation(
            ADD_CONNECTOR,
            Arc::new(AddConnector),
            StaticDescription::shared("Add the remote JMX connector"),
            false,
        )?;
        subsystem.register_operation(
            REMOVE_CONNECTOR,
            Arc::new(RemoveConnector),
            StaticDescription::shared("Remove the remote JMX connector"),
            false,
        )?;
        subsystem.register_attribute(SERVER_BINDING, None, None, Storage::Configuration)?;
        subsystem.register_attribute(REGISTRY_BINDING, None, None, Storage::Configuration)?;
        Ok(())
    }

    fn startup_operations(&self, model: &ModelNode) -> Vec<ModelNode> {
        let Some(node) = subsystem(model, JMX) else {
            return Vec::new();
        };
        let address = subsystem_address(JMX);
        let mut operations = vec![operation_for(ADD, &address)];
        if node.has_defined(SERVER_BINDING) {
            let mut connector = operation_for(ADD_CONNECTOR, &address);
            for key in [SERVER_BINDING, REGISTRY_BINDING] {
                if let Some(value) = node.get(key).filter(|v| v.is_defined()) {
                    connector.set(key, value.clone());
                }
            }
            operations.push(connector);
        }
        operations
    }
}

struct AddConnector;

#[async_trait::async_trait]
impl OperationHandler for AddConnector {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        let server_binding = match operation.require(SERVER_BINDING).and_then(ModelNode::as_string) {
            Ok(binding) => binding,
            Err(e) => return results.fail(e),
        };
        let registry_binding = match operation.require(REGISTRY_BINDING).and_then(ModelNode::as_string) {
            Ok(binding) => binding,
            Err(e) => return results.fail(e),
        };
        if ctx.sub_model().has_defined(SERVER_BINDING) {
            return results.fail(OperationError::handler_failure(format!(
                "a connector is already configured at {}",
                ctx.address()
            )));
        }

        if let Some(target) = ctx.service_target() {
            let service = Arc::new(JmxConnectorService::new(&server_binding, &registry_binding));
            if let Err(e) = target.install(connector_service(), service).await {
                return results.fail(service_failure(e));
            }
        }

        let sub_model = ctx.sub_model_mut();
        sub_model.set(SERVER_BINDING, server_binding);
        sub_model.set(REGISTRY_BINDING, registry_binding);
        results.complete(operation.compensating(REMOVE_CONNECTOR));
    }
}

struct RemoveConnector;

#[async_trait::async_trait]
impl OperationHandler for RemoveConnector {
    async fn execute(&self, ctx: &mut OperationContext, operation: &Operation, results: ResultChannel) {
        if let Err(e) = require_resource(ctx) {
            return results.fail(e);
        }
        if !ctx.sub_model().has_defined(SERVER_BINDING) {
            return results.complete(operation.compensating(REMOVE_CONNECTOR));
        }
        let mut compensating = operation.compensating(ADD_CONNECTOR);
        for key in [SERVER_BINDING, REGISTRY_BINDING] {
            if let Some(value) = ctx.sub_model().get(key) {
                compensating.set(key, value.clone());
            }
        }

        if let Some(target) = ctx.service_target() {
            let name = connector_service();
            if target.contains(&name) {
                if let Err(e) = target.remove(&name).await {
                    return results.fail(service_failure(e));
                }
            }
        }

        let sub_model = ctx.sub_model_mut();
        sub_model.remove(SERVER_BINDING);
        sub_model.remove(REGISTRY_BINDING);
        results.complete(compensating);
    }
}
