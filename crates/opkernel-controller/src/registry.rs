//! Resource registry - the tree of legal addresses.
//!
//! Every node declares the operations, attributes and child resource types
//! legal at its address. Children are keyed by a path-segment pattern that is
//! either concrete (`subsystem=logging`) or a wildcard (`jvm=*`). The tree is
//! built once by extensions at startup and shared read-only afterwards.

use crate::handler::{DescriptionProvider, OperationHandler};
use opkernel_core::{ModelNode, OperationError, PathAddress, PathElement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Where an attribute's value lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Storage {
    /// Persisted configuration only.
    Configuration,
    /// Live runtime state, never persisted.
    Runtime,
    /// Persisted and mirrored into the runtime.
    ConfigurationAndRuntime,
}

impl Storage {
    /// Whether the persistence collaborator writes this attribute.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Configuration | Self::ConfigurationAndRuntime)
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Runtime => write!(f, "runtime"),
            Self::ConfigurationAndRuntime => write!(f, "configuration+runtime"),
        }
    }
}

/// A registered operation.
#[derive(Clone)]
pub struct OperationEntry {
    pub handler: Arc<dyn OperationHandler>,
    pub description: Arc<dyn DescriptionProvider>,
    /// Also applies to every address below the registering node.
    pub inherited: bool,
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("read_only", &self.handler.is_read_only())
            .field("inherited", &self.inherited)
            .finish()
    }
}

/// A registered attribute.
#[derive(Clone)]
pub struct AttributeAccess {
    /// Absent: the attribute is read straight from the model.
    pub read: Option<Arc<dyn OperationHandler>>,
    /// Absent: the attribute is read-only.
    pub write: Option<Arc<dyn OperationHandler>>,
    pub storage: Storage,
}

impl AttributeAccess {
    pub fn is_read_only(&self) -> bool {
        self.write.is_none()
    }
}

impl fmt::Debug for AttributeAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeAccess")
            .field("readable", &self.read.is_some())
            .field("writable", &self.write.is_some())
            .field("storage", &self.storage)
            .finish()
    }
}

/// Registration mistakes. These are programming errors surfaced at startup,
/// never during dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("operation '{name}' already registered at {address}")]
    DuplicateOperation { name: String, address: PathAddress },

    #[error("attribute '{name}' already registered at {address}")]
    DuplicateAttribute { name: String, address: PathAddress },

    #[error("child {pattern} already registered at {address}")]
    DuplicateChild { pattern: PathElement, address: PathAddress },

    #[error("no registration at {0}")]
    NotRegistered(PathAddress),
}

// ---------------------------------------------------------------------------
// RegistryNode
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RegistryNode {
    /// Registration pattern address of this node (may contain wildcards).
    address: PathAddress,
    operations: BTreeMap<String, OperationEntry>,
    attributes: BTreeMap<String, AttributeAccess>,
    children: BTreeMap<PathElement, RegistryNode>,
}

impl RegistryNode {
    fn new(address: PathAddress) -> Self {
        Self {
            address,
            operations: BTreeMap::new(),
            attributes: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    pub fn register_operation(
        &mut self,
        name: &str,
        handler: Arc<dyn OperationHandler>,
        description: Arc<dyn DescriptionProvider>,
        inherited: bool,
    ) -> Result<(), RegistrationError> {
        if self.operations.contains_key(name) {
            return Err(RegistrationError::DuplicateOperation {
                name: name.to_string(),
                address: self.address.clone(),
            });
        }
        debug!("Registered operation {} at {}", name, self.address);
        self.operations.insert(
            name.to_string(),
            OperationEntry {
                handler,
                description,
                inherited,
            },
        );
        Ok(())
    }

    pub fn register_attribute(
        &mut self,
        name: &str,
        read: Option<Arc<dyn OperationHandler>>,
        write: Option<Arc<dyn OperationHandler>>,
        storage: Storage,
    ) -> Result<(), RegistrationError> {
        if self.attributes.contains_key(name) {
            return Err(RegistrationError::DuplicateAttribute {
                name: name.to_string(),
                address: self.address.clone(),
            });
        }
        self.attributes.insert(name.to_string(), AttributeAccess { read, write, storage });
        Ok(())
    }

    /// Register a child resource type and return its (empty) sub-registry.
    pub fn register_child(&mut self, pattern: PathElement) -> Result<&mut RegistryNode, RegistrationError> {
        if self.children.contains_key(&pattern) {
            return Err(RegistrationError::DuplicateChild {
                pattern,
                address: self.address.clone(),
            });
        }
        let address = self.address.append(pattern.clone());
        Ok(self
            .children
            .entry(pattern)
            .or_insert_with(|| RegistryNode::new(address)))
    }

    /// An existing child registration, for extensions that register below
    /// another extension's node.
    pub fn child_mut(&mut self, pattern: &PathElement) -> Option<&mut RegistryNode> {
        self.children.get_mut(pattern)
    }

    /// Child registration covering `element`: concrete first, then wildcard.
    pub fn child(&self, element: &PathElement) -> Option<&RegistryNode> {
        self.children
            .get(element)
            .or_else(|| self.children.get(&PathElement::wildcard(element.key())))
    }

    pub fn operation(&self, name: &str) -> Option<&OperationEntry> {
        self.operations.get(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeAccess> {
        self.attributes.get(name)
    }

    pub fn operation_names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeAccess)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Distinct child resource types (`jvm`, `subsystem`, ...).
    pub fn child_types(&self) -> BTreeSet<&str> {
        self.children.keys().map(PathElement::key).collect()
    }

    pub fn has_child_type(&self, child_type: &str) -> bool {
        self.children.keys().any(|p| p.key() == child_type)
    }

    pub fn children(&self) -> impl Iterator<Item = &RegistryNode> {
        self.children.values()
    }

    /// Registration tree rendered as a model node, for introspection.
    pub fn describe(&self) -> ModelNode {
        let mut node = ModelNode::new_object();
        node.set(
            "operations",
            ModelNode::List(self.operations.keys().map(|k| ModelNode::from(k.as_str())).collect()),
        );
        let mut attributes = ModelNode::new_object();
        for (name, access) in &self.attributes {
            attributes.set(
                name,
                ModelNode::new_object()
                    .with("storage", access.storage.to_string())
                    .with("read-only", access.is_read_only()),
            );
        }
        node.set("attributes", attributes);
        let mut children = ModelNode::new_object();
        for (pattern, child) in &self.children {
            children.set(&pattern.to_string(), child.describe());
        }
        node.set("children", children);
        node
    }
}

// ---------------------------------------------------------------------------
// ResourceRegistry
// ---------------------------------------------------------------------------

/// Root of the registration tree.
#[derive(Debug)]
pub struct ResourceRegistry {
    root: RegistryNode,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            root: RegistryNode::new(PathAddress::root()),
        }
    }

    pub fn root(&self) -> &RegistryNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RegistryNode {
        &mut self.root
    }

    /// Run an extension's registrations against the root.
    pub fn register_extension(&mut self, extension: &dyn Extension) -> Result<(), RegistrationError> {
        extension.initialize(&mut self.root)?;
        tracing::info!("Initialized extension {}", extension.name());
        Ok(())
    }

    /// The most specific registration for a concrete address.
    pub fn resolve(&self, address: &PathAddress) -> Result<&RegistryNode, OperationError> {
        self.resolve_chain(address).map(|chain| chain[chain.len() - 1])
    }

    /// Registration nodes from the root down to `address`, inclusive.
    fn resolve_chain(&self, address: &PathAddress) -> Result<Vec<&RegistryNode>, OperationError> {
        let mut chain = Vec::with_capacity(address.len() + 1);
        let mut node = &self.root;
        chain.push(node);
        for element in address.elements() {
            node = node
                .child(element)
                .ok_or_else(|| OperationError::AddressNotFound(address.clone()))?;
            chain.push(node);
        }
        Ok(chain)
    }

    /// Find `name` at `address`, falling back to inherited operations
    /// registered on ancestors.
    pub fn operation(&self, address: &PathAddress, name: &str) -> Result<&OperationEntry, OperationError> {
        let mut nodes = self.resolve_chain(address)?.into_iter().rev();
        let target = nodes
            .next()
            .ok_or_else(|| OperationError::AddressNotFound(address.clone()))?;
        if let Some(entry) = target.operation(name) {
            return Ok(entry);
        }
        nodes
            .filter_map(|node| node.operation(name))
            .find(|entry| entry.inherited)
            .ok_or_else(|| OperationError::unknown_operation(name, address))
    }

    /// All operation names callable at `address`, inherited ones included.
    pub fn operation_names_at(&self, address: &PathAddress) -> Result<Vec<String>, OperationError> {
        let chain = self.resolve_chain(address)?;
        let mut names = BTreeSet::new();
        let last = chain.len() - 1;
        for (depth, node) in chain.iter().enumerate() {
            for (name, entry) in &node.operations {
                if depth == last || entry.inherited {
                    names.insert(name.clone());
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// A subsystem's registration hook. Every extension is initialized before
/// the controller starts dispatching.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self, root: &mut RegistryNode) -> Result<(), RegistrationError>;

    /// Requests that rebuild this extension's resources in `model` on an
    /// empty controller, parents first. Replaying them starts the runtime
    /// services the stored configuration implies.
    fn startup_operations(&self, _model: &ModelNode) -> Vec<ModelNode> {
        Vec::new()
    }
}
