//! Execution context handed to operation handlers

use crate::registry::{RegistryNode, ResourceRegistry};
use crate::service::{Service, ServiceContainer, ServiceName, ServiceTarget};
use opkernel_core::{ModelNode, OperationError, PathAddress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handler may touch while it runs.
///
/// `sub_model` is a candidate copy of the live node at the operation's
/// address. The dispatcher swaps it into the live model only when the handler
/// completes successfully.
pub struct OperationContext {
    address: PathAddress,
    registry: Arc<ResourceRegistry>,
    sub_model: ModelNode,
    service_target: Option<ServiceTarget>,
    services: Option<Arc<dyn ServiceContainer>>,
    cancel: CancellationToken,
    mutating: Arc<AtomicBool>,
}

impl OperationContext {
    pub(crate) fn new(
        address: PathAddress,
        registry: Arc<ResourceRegistry>,
        sub_model: ModelNode,
        services: Option<Arc<dyn ServiceContainer>>,
        writable: bool,
        cancel: CancellationToken,
        mutating: Arc<AtomicBool>,
    ) -> Self {
        let service_target = match (&services, writable) {
            (Some(container), true) => Some(ServiceTarget::new(container.clone(), mutating.clone())),
            _ => None,
        };
        Self {
            address,
            registry,
            sub_model,
            service_target,
            services,
            cancel,
            mutating,
        }
    }

    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Registration node for this context's address.
    pub fn registration(&self) -> Result<&RegistryNode, OperationError> {
        self.registry.resolve(&self.address)
    }

    pub fn sub_model(&self) -> &ModelNode {
        &self.sub_model
    }

    /// Mutable candidate sub-model. Marks the operation as mutating.
    pub fn sub_model_mut(&mut self) -> &mut ModelNode {
        self.mutating.store(true, Ordering::SeqCst);
        &mut self.sub_model
    }

    /// The service-installation handle. `None` in admin-only mode and for
    /// read-only operations; handlers skip runtime work in that case.
    pub fn service_target(&mut self) -> Option<&mut ServiceTarget> {
        self.service_target.as_mut()
    }

    /// Whether runtime services are reachable from this context.
    pub fn is_runtime(&self) -> bool {
        self.services.is_some()
    }

    /// Look up a live service (runtime mode only).
    pub fn service(&self, name: &ServiceName) -> Option<Arc<dyn Service>> {
        self.services.as_ref().and_then(|c| c.get(name))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating.load(Ordering::SeqCst)
    }

    pub(crate) fn into_parts(self) -> (ModelNode, Option<ServiceTarget>) {
        (self.sub_model, self.service_target)
    }
}
