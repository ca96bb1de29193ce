//! The in-memory capability registry.
//!
//! Built once at process start and read-only afterwards, so it is shared
//! across threads behind an `Arc` without locking. Handler binding is the
//! only interior mutation and goes through a `OnceCell`.

use crate::capability::{Capability, Factory};
use crate::error::DiscoveryError;
use crate::manifest::Surface;
use crate::schema::CompiledSchema;
use crate::validate::{CompiledContract, ContractValidator};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolbox_core::{CapabilityError, Contract};

/// One registered capability
pub struct CapabilityRecord {
    contract: Contract,
    input: CompiledSchema,
    output: CompiledSchema,
    dir: Option<PathBuf>,
    surfaces: BTreeSet<Surface>,
    entry_point: String,
    factory: Option<Factory>,
    handler: OnceCell<Arc<dyn Capability>>,
}

impl CapabilityRecord {
    pub(crate) fn new(
        contract: Contract,
        compiled: CompiledContract,
        entry_point: String,
        factory: Option<Factory>,
    ) -> Self {
        Self {
            contract,
            input: compiled.input,
            output: compiled.output,
            dir: None,
            surfaces: Surface::all(),
            entry_point,
            factory,
            handler: OnceCell::new(),
        }
    }

    pub(crate) fn with_dir(mut self, dir: PathBuf) -> Self {
        self.dir = Some(dir);
        self
    }

    pub(crate) fn with_surfaces(mut self, surfaces: BTreeSet<Surface>) -> Self {
        self.surfaces = surfaces;
        self
    }

    /// Capability name
    #[must_use]
    pub fn name(&self) -> &str {
        self.contract.name.as_str()
    }

    /// The contract
    #[must_use]
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Compiled input schema
    #[must_use]
    pub fn input_schema(&self) -> &CompiledSchema {
        &self.input
    }

    /// Compiled output schema
    #[must_use]
    pub fn output_schema(&self) -> &CompiledSchema {
        &self.output
    }

    /// Plugin directory, for discovered capabilities
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Exposed surfaces
    #[must_use]
    pub fn surfaces(&self) -> &BTreeSet<Surface> {
        &self.surfaces
    }

    /// Whether the capability is exposed on `surface`
    #[must_use]
    pub fn exposes(&self, surface: Surface) -> bool {
        self.surfaces.contains(&surface)
    }

    /// Entry-point name the handler is bound from
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Whether the handler has been bound
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handler.get().is_some()
    }

    /// Bind the handler, running the factory on first call
    ///
    /// # Errors
    ///
    /// Returns `dependency_error` if the entry point is unknown or its
    /// factory fails; a failed bind is retried on the next call
    pub fn bind(&self) -> Result<Arc<dyn Capability>, CapabilityError> {
        self.handler
            .get_or_try_init(|| match &self.factory {
                Some(factory) => factory(),
                None => Err(CapabilityError::dependency(format!(
                    "entry point '{}' for {} is not available",
                    self.entry_point,
                    self.name()
                ))),
            })
            .map(Arc::clone)
    }

    fn origin(&self) -> String {
        self.dir
            .as_ref()
            .map_or_else(|| "<inline>".to_string(), |d| d.display().to_string())
    }
}

impl fmt::Debug for CapabilityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRecord")
            .field("name", &self.name())
            .field("version", &self.contract.version)
            .field("dir", &self.dir)
            .field("surfaces", &self.surfaces)
            .field("entry_point", &self.entry_point)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Name to record mapping, sorted by name
#[derive(Debug, Default)]
pub struct Registry {
    records: IndexMap<String, CapabilityRecord>,
}

impl Registry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up a record
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CapabilityRecord> {
        self.records.get(name)
    }

    /// Check if a capability is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Names in sorted order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Records in name order
    pub fn records(&self) -> impl Iterator<Item = &CapabilityRecord> {
        self.records.values()
    }

    /// Records exposed on `surface`, in name order
    pub fn for_surface(&self, surface: Surface) -> impl Iterator<Item = &CapabilityRecord> {
        self.records.values().filter(move |r| r.exposes(surface))
    }

    /// Contracts in name order
    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.records.values().map(CapabilityRecord::contract)
    }

    /// Number of capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accumulates records, enforcing name uniqueness
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    records: IndexMap<String, CapabilityRecord>,
    validator: ContractValidator,
}

impl RegistryBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom contract validator
    #[must_use]
    pub fn with_validator(mut self, validator: ContractValidator) -> Self {
        self.validator = validator;
        self
    }

    pub(crate) fn validator(&self) -> &ContractValidator {
        &self.validator
    }

    /// Register a contract with an already-constructed handler
    ///
    /// # Errors
    ///
    /// Returns error if the contract is invalid or the name is taken
    pub fn register<C>(&mut self, contract: Contract, handler: C) -> Result<(), DiscoveryError>
    where
        C: Capability + 'static,
    {
        let compiled =
            self.validator
                .validate(&contract)
                .map_err(|e| DiscoveryError::InvalidContract {
                    dir: PathBuf::from(format!("<inline {}>", contract.name)),
                    reason: e.to_string(),
                })?;
        let entry_point = contract.name.to_string();
        let record = CapabilityRecord::new(contract, compiled, entry_point, None);
        let handler: Arc<dyn Capability> = Arc::new(handler);
        // A fresh cell cannot already be set.
        let _ = record.handler.set(handler);
        self.insert(record)
    }

    pub(crate) fn insert(&mut self, record: CapabilityRecord) -> Result<(), DiscoveryError> {
        if let Some(existing) = self.records.get(record.name()) {
            return Err(DiscoveryError::DuplicateCapability {
                name: record.name().to_string(),
                first: existing.origin(),
                second: record.origin(),
            });
        }
        self.records.insert(record.name().to_string(), record);
        Ok(())
    }

    /// Finish, sorting records by name
    #[must_use]
    pub fn build(mut self) -> Registry {
        self.records.sort_keys();
        Registry {
            records: self.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use toolbox_core::CapabilityName;

    fn contract(name: &str) -> Contract {
        Contract::new(CapabilityName::parse(name).unwrap())
    }

    fn noop(_input: Value) -> Result<Value, CapabilityError> {
        Ok(json!({}))
    }

    #[test]
    fn test_registry_empty() {
        let registry = Registry::builder().build();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("text.normalize_markdown").is_none());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = Registry::builder();
        builder.register(contract("text.normalize_markdown"), noop).unwrap();
        let registry = builder.build();
        assert!(registry.contains("text.normalize_markdown"));
        let record = registry.get("text.normalize_markdown").unwrap();
        assert!(record.is_bound());
        assert!(record.dir().is_none());
        assert!(record.bind().is_ok());
    }

    #[test]
    fn test_register_duplicate() {
        let mut builder = Registry::builder();
        builder.register(contract("ghcr.push"), noop).unwrap();
        let err = builder.register(contract("ghcr.push"), noop).unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateCapability { .. }));
    }

    #[test]
    fn test_names_sorted() {
        let mut builder = Registry::builder();
        for name in ["text.normalize_markdown", "bsport.list_offers", "ghcr.push"] {
            builder.register(contract(name), noop).unwrap();
        }
        let registry = builder.build();
        assert_eq!(
            registry.names(),
            vec!["bsport.list_offers", "ghcr.push", "text.normalize_markdown"]
        );
    }

    #[test]
    fn test_register_rejects_invalid_contract() {
        let mut builder = Registry::builder();
        let bad = contract("ghcr.push").with_input_schema(json!({"type": 3}));
        assert!(matches!(
            builder.register(bad, noop),
            Err(DiscoveryError::InvalidContract { .. })
        ));
    }

    #[test]
    fn test_unbound_entry_point_is_dependency_error() {
        let c = contract("deploy.compose");
        let compiled = ContractValidator::new().validate(&c).unwrap();
        let record = CapabilityRecord::new(c, compiled, "deploy_compose".to_string(), None);
        let err = record.bind().err().unwrap();
        assert_eq!(err.code, "dependency_error");
        assert!(err.message.contains("deploy_compose"));
        assert!(!record.is_bound());
    }

    #[test]
    fn test_for_surface() {
        let mut builder = Registry::builder();
        builder.register(contract("ghcr.push"), noop).unwrap();
        let c = contract("deploy.compose");
        let compiled = builder.validator().validate(&c).unwrap();
        let record = CapabilityRecord::new(c, compiled, "deploy.compose".to_string(), None)
            .with_surfaces([Surface::Cli].into_iter().collect());
        builder.insert(record).unwrap();
        let registry = builder.build();

        let mcp: Vec<&str> = registry.for_surface(Surface::Mcp).map(|r| r.name()).collect();
        assert_eq!(mcp, vec!["ghcr.push"]);
        let cli: Vec<&str> = registry.for_surface(Surface::Cli).map(|r| r.name()).collect();
        assert_eq!(cli, vec!["deploy.compose", "ghcr.push"]);
    }

    #[test]
    fn test_registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }
}
