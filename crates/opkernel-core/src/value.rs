//! Value tree - the dynamically-typed document used both as the persistent
//! management model and as operation request/response payloads.
//!
//! Objects keep insertion order. Equality is structural: two objects are equal
//! when they hold equal values under the same keys, regardless of key order.

use crate::error::{OperationError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// JSON key used to carry a base64-encoded bytes value.
pub const BYTES_VALUE: &str = "BYTES_VALUE";

/// The type tag of a [`ModelNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelType {
    Undefined,
    Boolean,
    Int,
    Decimal,
    String,
    Bytes,
    List,
    Object,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "UNDEFINED"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Int => write!(f, "INT"),
            Self::Decimal => write!(f, "DECIMAL"),
            Self::String => write!(f, "STRING"),
            Self::Bytes => write!(f, "BYTES"),
            Self::List => write!(f, "LIST"),
            Self::Object => write!(f, "OBJECT"),
        }
    }
}

/// A node of the value tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ModelNode {
    #[default]
    Undefined,
    Boolean(bool),
    Int(i64),
    Decimal(Decimal),
    String(String),
    Bytes(Bytes),
    List(Vec<ModelNode>),
    Object(IndexMap<String, ModelNode>),
}

impl ModelNode {
    pub fn new_object() -> Self {
        Self::Object(IndexMap::new())
    }

    pub fn new_list() -> Self {
        Self::List(Vec::new())
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Undefined => ModelType::Undefined,
            Self::Boolean(_) => ModelType::Boolean,
            Self::Int(_) => ModelType::Int,
            Self::Decimal(_) => ModelType::Decimal,
            Self::String(_) => ModelType::String,
            Self::Bytes(_) => ModelType::Bytes,
            Self::List(_) => ModelType::List,
            Self::Object(_) => ModelType::Object,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    // -----------------------------------------------------------------------
    // Object access
    // -----------------------------------------------------------------------

    /// Child value under `key`, if this is an object holding that key.
    pub fn get(&self, key: &str) -> Option<&ModelNode> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ModelNode> {
        match self {
            Self::Object(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// True when `key` is present and holds a defined value.
    pub fn has_defined(&self, key: &str) -> bool {
        self.get(key).map(ModelNode::is_defined).unwrap_or(false)
    }

    /// The defined value under `key`, or `MissingParameter`.
    pub fn require(&self, key: &str) -> Result<&ModelNode> {
        match self.get(key) {
            Some(value) if value.is_defined() => Ok(value),
            _ => Err(OperationError::MissingParameter(key.to_string())),
        }
    }

    /// Mutable child under `key`, created as undefined when absent.
    ///
    /// A node that is not an object is replaced by an empty object first.
    pub fn entry(&mut self, key: &str) -> &mut ModelNode {
        if !matches!(self, Self::Object(_)) {
            *self = Self::new_object();
        }
        match self {
            Self::Object(map) => map.entry(key.to_string()).or_default(),
            _ => unreachable!("node was just made an object"),
        }
    }

    /// Set `key` to `value`, turning this node into an object if needed.
    pub fn set(&mut self, key: &str, value: impl Into<ModelNode>) {
        *self.entry(key) = value.into();
    }

    /// Remove `key`, keeping the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<ModelNode> {
        match self {
            Self::Object(map) => map.shift_remove(key),
            _ => None,
        }
    }

    /// Builder-style `set`, handy for constructing requests.
    pub fn with(mut self, key: &str, value: impl Into<ModelNode>) -> Self {
        self.set(key, value);
        self
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, ModelNode>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // List access
    // -----------------------------------------------------------------------

    /// Append to this list. Undefined becomes an empty list first; any other
    /// non-list node is replaced.
    pub fn push(&mut self, value: impl Into<ModelNode>) {
        match self {
            Self::List(items) => items.push(value.into()),
            _ => *self = Self::List(vec![value.into()]),
        }
    }

    pub fn as_list(&self) -> Option<&[ModelNode]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Scalar coercions
    // -----------------------------------------------------------------------

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// String rendering of a scalar. Lists, objects, bytes and undefined
    /// have no string form.
    pub fn as_string(&self) -> Result<String> {
        match self {
            Self::String(s) => Ok(s.clone()),
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Int(i) => Ok(i.to_string()),
            Self::Decimal(d) => Ok(d.to_string()),
            other => Err(OperationError::type_mismatch(ModelType::String, other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            Self::Int(i) => Ok(*i != 0),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(OperationError::type_mismatch(ModelType::Boolean, other)),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Decimal(d) if d.fract().is_zero() => d
                .to_i64()
                .ok_or_else(|| OperationError::type_mismatch(ModelType::Int, self)),
            Self::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| OperationError::type_mismatch(ModelType::Int, self)),
            other => Err(OperationError::type_mismatch(ModelType::Int, other)),
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        match self {
            Self::Decimal(d) => Ok(*d),
            Self::Int(i) => Ok(Decimal::from(*i)),
            Self::String(s) => Decimal::from_str(s.trim())
                .map_err(|_| OperationError::type_mismatch(ModelType::Decimal, self)),
            other => Err(OperationError::type_mismatch(ModelType::Decimal, other)),
        }
    }

    /// Convert this value to `target`, failing with `TypeMismatch` when no
    /// lossless coercion exists. Undefined passes through unchanged.
    pub fn coerce(&self, target: ModelType) -> Result<ModelNode> {
        if !self.is_defined() {
            return Ok(Self::Undefined);
        }
        match target {
            ModelType::Undefined => Ok(self.clone()),
            ModelType::Boolean => self.as_bool().map(Self::Boolean),
            ModelType::Int => self.as_i64().map(Self::Int),
            ModelType::Decimal => self.as_decimal().map(Self::Decimal),
            ModelType::String => self.as_string().map(Self::String),
            ty if ty == self.model_type() => Ok(self.clone()),
            ty => Err(OperationError::type_mismatch(ty, self)),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for ModelNode {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for ModelNode {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ModelNode {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<Decimal> for ModelNode {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<&str> for ModelNode {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ModelNode {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Bytes> for ModelNode {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<ModelNode>> for ModelNode {
    fn from(items: Vec<ModelNode>) -> Self {
        Self::List(items)
    }
}

impl From<&ModelNode> for ModelNode {
    fn from(node: &ModelNode) -> Self {
        node.clone()
    }
}

impl From<Value> for ModelNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Undefined,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => {
                    let text = n.to_string();
                    Decimal::from_str(&text)
                        .or_else(|_| Decimal::from_scientific(&text))
                        .map(Self::Decimal)
                        .unwrap_or(Self::String(text))
                }
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::String(encoded)) = map.get(BYTES_VALUE) {
                        if let Ok(raw) = STANDARD.decode(encoded) {
                            return Self::Bytes(Bytes::from(raw));
                        }
                    }
                }
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&ModelNode> for Value {
    fn from(node: &ModelNode) -> Self {
        match node {
            ModelNode::Undefined => Value::Null,
            ModelNode::Boolean(b) => Value::Bool(*b),
            ModelNode::Int(i) => Value::from(*i),
            ModelNode::Decimal(d) => serde_json::Number::from_str(&d.to_string())
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(d.to_string())),
            ModelNode::String(s) => Value::String(s.clone()),
            ModelNode::Bytes(b) => {
                let mut map = serde_json::Map::new();
                map.insert(BYTES_VALUE.to_string(), Value::String(STANDARD.encode(b)));
                Value::Object(map)
            }
            ModelNode::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            ModelNode::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<ModelNode> for Value {
    fn from(node: ModelNode) -> Self {
        Value::from(&node)
    }
}

impl fmt::Display for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self))
    }
}
