//! The single request/response path every surface goes through.
//!
//! Order is fixed: lookup, input validation, handler, error mapping, output
//! validation. A declared contract is never violated in either direction.

use crate::registry::{CapabilityRecord, Registry};
use crate::schema::summarize;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use toolbox_core::{CapabilityError, Envelope, ErrorCode, SchemaViolation};
use tracing::Instrument as _;

/// Routes invocations through a shared registry
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Shared handle to the registry
    #[must_use]
    pub fn registry_arc(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Invoke a capability
    ///
    /// Never panics and never returns an undeclared error code.
    #[must_use]
    pub fn invoke(&self, name: &str, input: Value) -> Envelope {
        let span = tracing::info_span!("dispatch", capability = %name, outcome = tracing::field::Empty);
        let _guard = span.enter();

        let envelope = match self.registry.get(name) {
            None => Envelope::unknown_capability(name),
            Some(record) => run(record, input),
        };

        let outcome = envelope.error_code().unwrap_or("ok");
        span.record("outcome", outcome);
        if envelope.is_ok() {
            tracing::debug!("capability succeeded");
        } else {
            tracing::warn!(code = outcome, "capability failed");
        }
        envelope
    }

    /// Invoke with a raw JSON document
    ///
    /// Malformed JSON is reported as `validation_error`.
    #[must_use]
    pub fn invoke_json(&self, name: &str, input: &str) -> Envelope {
        if !self.registry.contains(name) {
            return Envelope::unknown_capability(name);
        }
        match serde_json::from_str::<Value>(input) {
            Ok(value) => self.invoke(name, value),
            Err(e) => Envelope::failure(
                ErrorCode::ValidationError,
                format!("input is not valid JSON: {e}"),
            ),
        }
    }

    /// Invoke on tokio's blocking pool
    ///
    /// Handlers block on subprocesses and sockets, so async surfaces call
    /// this instead of [`Dispatcher::invoke`].
    pub async fn invoke_blocking(&self, name: String, input: Value) -> Envelope {
        let dispatcher = self.clone();
        let span = tracing::debug_span!("blocking_dispatch", capability = %name);
        let task = tokio::task::spawn_blocking(move || dispatcher.invoke(&name, input));
        match task.instrument(span).await {
            Ok(envelope) => envelope,
            Err(e) => Envelope::from_error(CapabilityError::generic(format!(
                "dispatch task failed: {e}"
            ))),
        }
    }
}

fn run(record: &CapabilityRecord, input: Value) -> Envelope {
    if let Err(violations) = record.input_schema().validate(&input) {
        return schema_failure(ErrorCode::ValidationError, "input", &violations);
    }

    let handler = match record.bind() {
        Ok(handler) => handler,
        Err(err) => return Envelope::from_error(err),
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| handler.invoke(input)));
    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => return Envelope::from_error(map_error(record, err)),
        Err(panic) => {
            return Envelope::failure(
                ErrorCode::CapabilityError,
                format!("capability panicked: {}", panic_message(panic.as_ref())),
            );
        }
    };

    if let Err(violations) = record.output_schema().validate(&result) {
        return schema_failure(ErrorCode::OutputValidationError, "result", &violations);
    }
    Envelope::success(result)
}

fn map_error(record: &CapabilityRecord, err: CapabilityError) -> CapabilityError {
    if record.contract().declares(&err.code) {
        return err;
    }
    CapabilityError::generic(format!(
        "undeclared error code '{}': {}",
        err.code, err.message
    ))
}

fn schema_failure(code: ErrorCode, subject: &str, violations: &[SchemaViolation]) -> Envelope {
    let details = serde_json::to_value(violations).unwrap_or(Value::Null);
    Envelope::from_error(
        CapabilityError::framework(
            code,
            format!("{subject} failed schema validation: {}", summarize(violations)),
        )
        .with_details(details),
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::EntryPoints;
    use crate::discover::discover;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolbox_core::{CONTRACT_FILE, CapabilityName, Contract};

    fn contract(name: &str) -> Contract {
        Contract::new(CapabilityName::parse(name).unwrap())
            .with_input_schema(json!({
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }))
            .with_output_schema(json!({
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }))
            .with_error("parse_error", "bad text")
    }

    fn dispatcher_with<F>(handler: F) -> Dispatcher
    where
        F: Fn(Value) -> Result<Value, CapabilityError> + Send + Sync + 'static,
    {
        let mut builder = Registry::builder();
        builder.register(contract("text.echo"), handler).unwrap();
        Dispatcher::new(Arc::new(builder.build()))
    }

    #[test]
    fn test_success() {
        let dispatcher = dispatcher_with(|input| Ok(json!({"text": input["text"]})));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env, Envelope::success(json!({"text": "hi"})));
    }

    #[test]
    fn test_unknown_capability_ignores_input() {
        let dispatcher = dispatcher_with(|input| Ok(input));
        for input in [json!({}), json!(null), json!({"text": 1})] {
            let env = dispatcher.invoke("nonexistent.thing", input);
            assert_eq!(env.error_code(), Some("unknown_capability"));
        }
    }

    #[test]
    fn test_invalid_input_never_invokes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let dispatcher = dispatcher_with(move |input| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(input)
        });

        let env = dispatcher.invoke("text.echo", json!({"text": 42}));
        assert_eq!(env.error_code(), Some("validation_error"));
        let details = env.error().unwrap().details.as_ref().unwrap();
        assert_eq!(details[0]["instance_path"], "/text");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_output_rejected() {
        let dispatcher = dispatcher_with(|_| Ok(json!({"text": 7})));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env.error_code(), Some("output_validation_error"));
        assert!(env.result().is_none());
    }

    #[test]
    fn test_declared_domain_error_passes() {
        let dispatcher = dispatcher_with(|_| Err(CapabilityError::new("parse_error", "no title")));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env.error_code(), Some("parse_error"));
        assert_eq!(env.error().unwrap().message, "no title");
    }

    #[test]
    fn test_undeclared_error_collapses() {
        let dispatcher = dispatcher_with(|_| Err(CapabilityError::new("ssh_error", "refused")));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env.error_code(), Some("capability_error"));
        assert!(env.error().unwrap().message.contains("ssh_error"));
    }

    #[test]
    fn test_framework_error_passes() {
        let dispatcher = dispatcher_with(|_| Err(CapabilityError::dependency("ssh not found in PATH")));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env.error_code(), Some("dependency_error"));
    }

    #[test]
    fn test_panic_becomes_capability_error() {
        let dispatcher = dispatcher_with(|_| panic!("boom"));
        let env = dispatcher.invoke("text.echo", json!({"text": "hi"}));
        assert_eq!(env.error_code(), Some("capability_error"));
        assert!(env.error().unwrap().message.contains("boom"));
    }

    #[test]
    fn test_invoke_json() {
        let dispatcher = dispatcher_with(|input| Ok(input));
        assert!(dispatcher.invoke_json("text.echo", r#"{"text": "x"}"#).is_ok());
        assert_eq!(
            dispatcher.invoke_json("text.echo", "{oops").error_code(),
            Some("validation_error")
        );
        assert_eq!(
            dispatcher.invoke_json("nonexistent.thing", "{oops").error_code(),
            Some("unknown_capability")
        );
    }

    #[test]
    fn test_missing_entry_point_is_dependency_error() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("deploy_compose");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(CONTRACT_FILE),
            contract("deploy.compose").to_json_pretty().unwrap(),
        )
        .unwrap();

        let registry = discover(root.path(), &EntryPoints::new()).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let env = dispatcher.invoke("deploy.compose", json!({"text": "x"}));
        assert_eq!(env.error_code(), Some("dependency_error"));
        let env = dispatcher.invoke("deploy.compose", json!({}));
        assert_eq!(env.error_code(), Some("validation_error"));
    }

    #[tokio::test]
    async fn test_invoke_blocking() {
        let dispatcher = dispatcher_with(|input| Ok(input));
        let env = dispatcher
            .invoke_blocking("text.echo".to_string(), json!({"text": "hi"}))
            .await;
        assert!(env.is_ok());
    }
}
