//! Toolbox Registry
//!
//! Discovers capability plugins, compiles their schemas, and dispatches
//! invocations through a fixed validate-invoke-validate path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod discover;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod schema;
pub mod validate;

pub use capability::{Capability, EntryPoints, Factory, Typed, typed};
pub use discover::{discover, discover_into, plugin_dirs};
pub use dispatch::Dispatcher;
pub use error::{DiscoveryError, SchemaError};
pub use manifest::{MANIFEST_FILE, PluginManifest, Surface};
pub use registry::{CapabilityRecord, Registry, RegistryBuilder};
pub use schema::CompiledSchema;
pub use validate::{CompiledContract, ContractRule, ContractValidator, ContractViolation};
