//! Contract checks run once at discovery.

use crate::schema::CompiledSchema;
use toolbox_core::{Contract, ErrorCode};

/// Why a contract was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// A schema failed to compile
    #[error("{field} does not compile: {reason}")]
    Schema {
        /// `input_schema` or `output_schema`
        field: &'static str,
        /// Compiler message
        reason: String,
    },
    /// Error table is malformed
    #[error("{reason}")]
    ErrorTable {
        /// Why
        reason: String,
    },
    /// A framework code other than `dependency_error` is declared
    #[error("error code '{code}' is reserved by the framework")]
    ReservedCode {
        /// Offending code
        code: String,
    },
}

/// Optional check; schema compilation always runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractRule {
    /// Codes are snake_case and unique
    ErrorTable,
    /// Only `dependency_error` may be redeclared from the framework set
    ReservedCodes,
}

/// Schemas compiled while checking a contract
#[derive(Debug)]
pub struct CompiledContract {
    /// Compiled `input_schema`
    pub input: CompiledSchema,
    /// Compiled `output_schema`
    pub output: CompiledSchema,
}

/// Checks contracts before they enter a registry
#[derive(Debug, Clone)]
pub struct ContractValidator {
    rules: Vec<ContractRule>,
}

impl ContractValidator {
    /// Validator with every rule enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: vec![ContractRule::ErrorTable, ContractRule::ReservedCodes],
        }
    }

    /// Restrict to specific rules
    ///
    /// Schemas are always compiled since the registry needs them.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<ContractRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Check a contract and compile its schemas
    ///
    /// # Errors
    ///
    /// Returns the first violated rule
    pub fn validate(&self, contract: &Contract) -> Result<CompiledContract, ContractViolation> {
        if self.rules.contains(&ContractRule::ErrorTable) {
            contract
                .check_shape()
                .map_err(|e| ContractViolation::ErrorTable {
                    reason: e.to_string(),
                })?;
        }

        if self.rules.contains(&ContractRule::ReservedCodes) {
            Self::validate_reserved(contract)?;
        }

        let input = compile("input_schema", &contract.input_schema)?;
        let output = compile("output_schema", &contract.output_schema)?;
        Ok(CompiledContract { input, output })
    }

    fn validate_reserved(contract: &Contract) -> Result<(), ContractViolation> {
        for code in contract.error_codes() {
            if code == ErrorCode::DependencyError.as_str() {
                continue;
            }
            if ErrorCode::is_framework(code) {
                return Err(ContractViolation::ReservedCode {
                    code: code.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ContractValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(
    field: &'static str,
    schema: &serde_json::Value,
) -> Result<CompiledSchema, ContractViolation> {
    CompiledSchema::compile(schema).map_err(|e| ContractViolation::Schema {
        field,
        reason: e.to_string(),
    })
}
