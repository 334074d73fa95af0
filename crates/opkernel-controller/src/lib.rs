//! opkernel controller - registry, dispatch, result channels, services
//!
//! Submissions go through [`ModelController::execute`]; extensions describe
//! their resources on a [`ResourceRegistry`] before the controller starts.

pub mod channel;
pub mod context;
pub mod controller;
pub mod handler;
pub mod handlers;
pub mod model;
pub mod persistence;
pub mod registry;
pub mod service;

pub use channel::{Cancellable, Completion, OperationState, PendingResult, ResultChannel};
pub use context::OperationContext;
pub use controller::{BootError, ControllerConfig, ControllerMode, HistoryEntry, ModelController, ModelControllerBuilder};
pub use handler::{handler_fn, query_fn, DescriptionProvider, OperationHandler, StaticDescription};
pub use handlers::{register_global_operations, BooleanWriteAttributeHandler, WriteAttributeHandler};
pub use persistence::{configuration_view, ConfigurationPersister, JsonFilePersister, NullPersister, PersistenceError};
pub use registry::{AttributeAccess, Extension, OperationEntry, RegistrationError, RegistryNode, ResourceRegistry, Storage};
pub use service::{InMemoryServiceContainer, Service, ServiceContainer, ServiceError, ServiceName, ServiceTarget};
