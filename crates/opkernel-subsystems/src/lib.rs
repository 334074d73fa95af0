//! opkernel subsystems - JVM definitions and the logging, JMX and deployment
//! scanner subsystems
//!
//! Each subsystem is an [`Extension`]. [`standard_registry`] builds the
//! registry the binary runs with: global operations plus every extension.

mod common;
pub mod deployment_scanner;
pub mod jmx;
pub mod jvm;
pub mod logging;

use opkernel_controller::{register_global_operations, Extension, RegistrationError, ResourceRegistry};
use opkernel_core::ModelNode;

pub use deployment_scanner::DeploymentScannerExtension;
pub use jmx::JmxExtension;
pub use jvm::JvmExtension;
pub use logging::LoggingExtension;

/// All bundled extensions, in registration order.
pub fn extensions() -> Vec<Box<dyn Extension>> {
    vec![
        Box::new(JvmExtension),
        Box::new(LoggingExtension),
        Box::new(JmxExtension),
        Box::new(DeploymentScannerExtension),
    ]
}

/// Registry with the global operations and every bundled extension.
pub fn standard_registry() -> Result<ResourceRegistry, RegistrationError> {
    let mut registry = ResourceRegistry::new();
    register_global_operations(registry.root_mut())?;
    for extension in extensions() {
        registry.register_extension(extension.as_ref())?;
    }
    Ok(registry)
}

/// Requests that rebuild a persisted configuration `model` on an empty
/// controller, in extension registration order.
pub fn startup_operations(model: &ModelNode) -> Vec<ModelNode> {
    extensions()
        .iter()
        .flat_map(|extension| extension.startup_operations(model))
        .collect()
}
