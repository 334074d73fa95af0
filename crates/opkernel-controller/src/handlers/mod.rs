//! Reusable handlers: the global operation set and attribute writers.

pub mod attributes;
pub mod global;

pub use attributes::{BooleanWriteAttributeHandler, WriteAttributeHandler};
pub use global::register_global_operations;
