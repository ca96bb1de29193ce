//! Toolbox Core Types
//!
//! This crate contains pure types and logic with no I/O beyond reading a
//! contract file. Contracts and envelopes serialize to the exact JSON shapes
//! every surface exchanges.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod name;
pub mod version;

// Re-exports
pub use config::{McpConfig, ToolboxConfig, Transport};
pub use contract::{CONTRACT_FILE, Contract, ErrorSpec};
pub use envelope::{Envelope, ErrorBody, SchemaViolation};
pub use error::{CapabilityError, CoreError, CoreResult, DomainError, ErrorCode};
pub use name::CapabilityName;
pub use version::{Version, VersionError};
