//! opkernel - management kernel for a path-addressed process model
//!
//! The engine lives in the workspace crates; this crate adds the binary's
//! configuration and boot-file handling.

pub mod boot;
pub mod config;

pub use boot::{render_state, restore_snapshot, BootFileError, BootOperations};
pub use config::{ConfigSource, KernelConfig};
