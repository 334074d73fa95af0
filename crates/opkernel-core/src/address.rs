//! Path addresses - ordered `(type, name)` segments identifying a model node.

use crate::error::{OperationError, Result};
use crate::value::ModelNode;
use std::fmt;
use std::str::FromStr;

/// Segment value matching any instance name of its type. Registration only.
pub const WILDCARD: &str = "*";

/// One `type=name` segment of an address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A `type=*` pattern for registering dynamically-created instances.
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Whether this segment, used as a registration pattern, covers `other`.
    pub fn matches(&self, other: &PathElement) -> bool {
        self.key == other.key && (self.is_wildcard() || self.value == other.value)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An ordered sequence of [`PathElement`]s. The empty address is the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PathAddress(Vec<PathElement>);

impl PathAddress {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// A new address with `element` appended.
    pub fn append(&self, element: PathElement) -> Self {
        let mut elements = self.0.clone();
        elements.push(element);
        Self(elements)
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// The address one level up, or `None` at the root.
    pub fn parent(&self) -> Option<PathAddress> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// True when no segment is a wildcard. Live operation addresses must be.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|e| !e.is_wildcard())
    }

    /// Parse the request form: a list of single-key objects
    /// (`[{"subsystem": "logging"}]`), or the textual `/type=name` form.
    pub fn from_model(node: &ModelNode) -> Result<Self> {
        match node {
            ModelNode::String(text) => text.parse(),
            ModelNode::List(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    let map = item.as_object().ok_or_else(|| {
                        OperationError::malformed(format!("address element is not an object: {}", item))
                    })?;
                    if map.len() != 1 {
                        return Err(OperationError::malformed(format!(
                            "address element must have exactly one key: {}",
                            item
                        )));
                    }
                    let (key, value) = map.iter().next().ok_or_else(|| {
                        OperationError::malformed("empty address element")
                    })?;
                    let value = value.as_str().ok_or_else(|| {
                        OperationError::malformed(format!("address value for '{}' is not a string", key))
                    })?;
                    if key.is_empty() || value.is_empty() {
                        return Err(OperationError::malformed(format!("empty type or name in {}", item)));
                    }
                    elements.push(PathElement::new(key.clone(), value));
                }
                Ok(Self(elements))
            }
            other => Err(OperationError::malformed(format!(
                "address must be a list or string, got {}",
                other.model_type()
            ))),
        }
    }

    pub fn to_model(&self) -> ModelNode {
        ModelNode::List(
            self.0
                .iter()
                .map(|e| ModelNode::new_object().with(e.key(), e.value()))
                .collect(),
        )
    }
}

impl FromStr for PathAddress {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "/" {
            return Ok(Self::root());
        }
        let mut elements = Vec::new();
        for segment in trimmed.trim_start_matches('/').split('/') {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| OperationError::malformed(format!("address segment '{}' is not type=name", segment)))?;
            if key.is_empty() || value.is_empty() {
                return Err(OperationError::malformed(format!("empty type or name in '{}'", segment)));
            }
            elements.push(PathElement::new(key, value));
        }
        Ok(Self(elements))
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for element in &self.0 {
            write!(f, "/{}", element)?;
        }
        Ok(())
    }
}

impl From<Vec<PathElement>> for PathAddress {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}
