//! Capability handlers and the entry-point table.
//!
//! A handler receives input that has already passed the contract's input
//! schema and returns a result that dispatch checks against the output
//! schema. Handlers are bound lazily: discovery only records the entry-point
//! name, and the factory runs on first invocation.

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use toolbox_core::{CapabilityError, ErrorCode};

/// A capability implementation
pub trait Capability: Send + Sync {
    /// Run against schema-valid input
    ///
    /// # Errors
    ///
    /// Returns a framework or declared domain error
    fn invoke(&self, input: Value) -> Result<Value, CapabilityError>;
}

impl<F> Capability for F
where
    F: Fn(Value) -> Result<Value, CapabilityError> + Send + Sync,
{
    fn invoke(&self, input: Value) -> Result<Value, CapabilityError> {
        self(input)
    }
}

/// Adapter from a typed function to [`Capability`]
///
/// Input is deserialized into `I` and the output serialized from `O`, so
/// implementations never touch raw JSON.
pub struct Typed<I, O, F> {
    func: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Wrap a typed function as a capability
pub fn typed<I, O, E, F>(func: F) -> Typed<I, O, F>
where
    I: DeserializeOwned,
    O: Serialize,
    E: Into<CapabilityError>,
    F: Fn(I) -> Result<O, E> + Send + Sync,
{
    Typed {
        func,
        _marker: PhantomData,
    }
}

impl<I, O, E, F> Capability for Typed<I, O, F>
where
    I: DeserializeOwned,
    O: Serialize,
    E: Into<CapabilityError>,
    F: Fn(I) -> Result<O, E> + Send + Sync,
{
    fn invoke(&self, input: Value) -> Result<Value, CapabilityError> {
        // The schema accepted the input, so this only fails when the schema is
        // looser than the struct.
        let input: I = serde_json::from_value(input).map_err(|e| {
            CapabilityError::framework(ErrorCode::ValidationError, format!("invalid input: {e}"))
        })?;
        let output = (self.func)(input).map_err(Into::into)?;
        serde_json::to_value(output)
            .map_err(|e| CapabilityError::generic(format!("result is not serializable: {e}")))
    }
}

/// Builds a handler on first use
pub type Factory = Arc<dyn Fn() -> Result<Arc<dyn Capability>, CapabilityError> + Send + Sync>;

/// Entry-point name to factory
///
/// This is the explicit registration table plugin manifests refer to.
#[derive(Clone, Default)]
pub struct EntryPoints {
    table: IndexMap<String, Factory>,
}

impl EntryPoints {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory
    #[must_use]
    pub fn with_factory(mut self, name: impl Into<String>, factory: Factory) -> Self {
        self.table.insert(name.into(), factory);
        self
    }

    /// Add a handler that needs no construction
    #[must_use]
    pub fn with_handler<C>(self, name: impl Into<String>, handler: C) -> Self
    where
        C: Capability + 'static,
    {
        let handler: Arc<dyn Capability> = Arc::new(handler);
        let factory: Factory = Arc::new(move || -> Result<Arc<dyn Capability>, CapabilityError> {
            Ok(Arc::clone(&handler))
        });
        self.with_factory(name, factory)
    }

    /// Look up a factory
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Factory> {
        self.table.get(name)
    }

    /// Registered names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Number of entry points
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.table.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Echo {
        text: String,
        #[serde(default)]
        upper: bool,
    }

    #[derive(Serialize)]
    struct EchoOut {
        text: String,
    }

    fn echo(input: Echo) -> Result<EchoOut, CapabilityError> {
        let text = if input.upper {
            input.text.to_uppercase()
        } else {
            input.text
        };
        Ok(EchoOut { text })
    }

    #[test]
    fn test_closure_capability() {
        let cap = |input: Value| -> Result<Value, CapabilityError> { Ok(json!({"echo": input})) };
        assert_eq!(cap.invoke(json!(1)).unwrap(), json!({"echo": 1}));
    }

    #[test]
    fn test_typed_capability() {
        let cap = typed(echo);
        let out = cap.invoke(json!({"text": "hi", "upper": true})).unwrap();
        assert_eq!(out, json!({"text": "HI"}));
    }

    #[test]
    fn test_typed_rejects_mismatched_input() {
        let cap = typed(echo);
        let err = cap.invoke(json!({"text": 5})).unwrap_err();
        assert_eq!(err.code, "validation_error");
    }

    #[test]
    fn test_entry_points_with_handler() {
        let table = EntryPoints::new().with_handler("echo", typed(echo));
        assert_eq!(table.len(), 1);
        let factory = table.get("echo").unwrap();
        let handler = factory().unwrap();
        assert_eq!(
            handler.invoke(json!({"text": "a"})).unwrap(),
            json!({"text": "a"})
        );
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_failing_factory() {
        let factory: Factory = Arc::new(|| -> Result<Arc<dyn Capability>, CapabilityError> {
            Err(CapabilityError::dependency("helper library unavailable"))
        });
        let table = EntryPoints::new().with_factory("broken", factory);
        let err = table.get("broken").map(|f| f()).unwrap().err().unwrap();
        assert_eq!(err.code, "dependency_error");
    }
}
