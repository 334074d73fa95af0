//! Configuration persistence seam.
//!
//! After every committed write the controller hands the configuration view
//! of the model to a [`ConfigurationPersister`]. The view drops attributes
//! registered with `Storage::Runtime`; everything else is configuration.

use crate::registry::{RegistryNode, ResourceRegistry};
use opkernel_core::{ModelNode, PathElement};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait ConfigurationPersister: Send + Sync {
    fn store(&self, configuration: &ModelNode) -> Result<(), PersistenceError>;
}

/// Discards everything. Used when no persistence is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPersister;

impl ConfigurationPersister for NullPersister {
    fn store(&self, _configuration: &ModelNode) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Writes the configuration view as pretty JSON, replacing the file
/// atomically via a temporary sibling.
#[derive(Debug, Clone)]
pub struct JsonFilePersister {
    path: PathBuf,
}

impl JsonFilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back a previously stored configuration, if any.
    pub fn load(&self) -> Result<Option<ModelNode>, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConfigurationPersister for JsonFilePersister {
    fn store(&self, configuration: &ModelNode) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(configuration)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// The model with runtime-only attributes stripped.
pub fn configuration_view(registry: &ResourceRegistry, model: &ModelNode) -> ModelNode {
    filter_node(registry.root(), model)
}

fn filter_node(registration: &RegistryNode, node: &ModelNode) -> ModelNode {
    let Some(map) = node.as_object() else {
        return node.clone();
    };
    let mut out = ModelNode::new_object();
    for (key, value) in map {
        if let Some(access) = registration.attribute(key) {
            if access.storage.is_persistent() {
                out.set(key, value.clone());
            }
        } else if registration.has_child_type(key) {
            let mut children = ModelNode::new_object();
            if let Some(instances) = value.as_object() {
                for (name, child) in instances {
                    match registration.child(&PathElement::new(key.as_str(), name.as_str())) {
                        Some(child_reg) => children.set(name, filter_node(child_reg, child)),
                        None => children.set(name, child.clone()),
                    }
                }
            }
            out.set(key, children);
        } else {
            out.set(key, value.clone());
        }
    }
    out
}
