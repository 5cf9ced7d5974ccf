use crate::agent::CapabilityRegistry;
use crate::error::{ToolError, ValidationError};
use crate::traits::{Arguments, CapabilityDescriptor, InvocationRequest, InvocationResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Uniform invocation wrapper around every registered capability.
///
/// Validates arguments against the capability's schema before anything runs,
/// then maps the tool's own outcome onto [`InvocationResult`]. It never
/// retries; that decision belongs to the orchestration loop.
#[derive(Clone)]
pub struct CapabilityAdapter {
    registry: Arc<CapabilityRegistry>,
}

impl CapabilityAdapter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        let entry = match self.registry.lookup(&request.capability) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(capability = %request.capability, "Requested capability is not registered");
                return InvocationResult::failure(e.to_string(), false);
            }
        };

        if let Err(e) = validate_arguments(entry.descriptor, &request.arguments) {
            debug!(capability = %request.capability, error = %e, "Rejected invocation arguments");
            return InvocationResult::failure(e.to_string(), true);
        }

        let executable = Arc::clone(entry.executable);
        let arguments = request.arguments.clone();
        let started = Instant::now();

        // Run on its own task so a panicking tool surfaces as a failure
        // instead of tearing down the session.
        let outcome = tokio::spawn(async move { executable.execute(arguments).await }).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(payload)) => {
                info!(capability = %request.capability, elapsed_ms, "Capability succeeded");
                InvocationResult::success(payload)
            }
            Ok(Err(ToolError::Recoverable(reason))) => {
                warn!(capability = %request.capability, elapsed_ms, %reason, "Capability failed");
                InvocationResult::failure(reason, true)
            }
            Ok(Err(ToolError::Fatal(reason))) => {
                error!(capability = %request.capability, elapsed_ms, %reason, "Capability hit a fatal fault");
                InvocationResult::failure(reason, false)
            }
            Err(join_error) => {
                warn!(capability = %request.capability, error = %join_error, "Capability task aborted");
                InvocationResult::failure(
                    format!("{} crashed while running: {}", request.capability, join_error),
                    true,
                )
            }
        }
    }
}

/// Check `args` against the descriptor: every required parameter present,
/// every supplied value of the declared type, nothing undeclared. A `null`
/// value counts as absent.
pub fn validate_arguments(
    descriptor: &CapabilityDescriptor,
    args: &Arguments,
) -> Result<(), ValidationError> {
    for (name, spec) in &descriptor.parameters {
        match args.get(name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(ValidationError::MissingParameter {
                        capability: descriptor.name.clone(),
                        parameter: name.clone(),
                    });
                }
            }
            Some(value) if !spec.param_type.accepts(value) => {
                return Err(ValidationError::WrongType {
                    capability: descriptor.name.clone(),
                    parameter: name.clone(),
                    expected: spec.param_type,
                    actual: json_type_name(value),
                });
            }
            Some(_) => {}
        }
    }

    if let Some(extra) = args
        .keys()
        .find(|key| !descriptor.parameters.contains_key(*key))
    {
        return Err(ValidationError::UnexpectedParameter {
            capability: descriptor.name.clone(),
            parameter: extra.clone(),
        });
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Capability, ParamType, ParameterSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Succeed,
        Recoverable,
        Fatal,
        Panic,
    }

    struct CountingCapability {
        calls: Arc<AtomicUsize>,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Capability for CountingCapability {
        fn name(&self) -> &str {
            "chart"
        }

        fn description(&self) -> &str {
            "Render a chart"
        }

        fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
            BTreeMap::from([
                (
                    "chart_type".to_string(),
                    ParameterSpec::required(ParamType::String, "Chart type"),
                ),
                (
                    "bins".to_string(),
                    ParameterSpec::optional(ParamType::Integer, "Histogram bins"),
                ),
            ])
        }

        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(json!({ "rendered": true })),
                Behaviour::Recoverable => Err(ToolError::recoverable("unsupported chart type")),
                Behaviour::Fatal => Err(ToolError::fatal("datastore unreachable")),
                Behaviour::Panic => panic!("renderer exploded"),
            }
        }
    }

    fn adapter_with(behaviour: Behaviour) -> (CapabilityAdapter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        registry
            .register(CountingCapability {
                calls: calls.clone(),
                behaviour,
            })
            .unwrap();
        (CapabilityAdapter::new(Arc::new(registry)), calls)
    }

    fn request(args: Value) -> InvocationRequest {
        InvocationRequest::new("chart", args.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn missing_required_parameter_never_reaches_tool() {
        let (adapter, calls) = adapter_with(Behaviour::Succeed);

        let result = adapter.invoke(&request(json!({ "bins": 4 }))).await;

        match result {
            InvocationResult::Failure {
                reason,
                recoverable,
            } => {
                assert!(recoverable);
                assert!(reason.contains("chart_type"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_type_and_extra_parameters_are_recoverable() {
        let (adapter, calls) = adapter_with(Behaviour::Succeed);

        let wrong = adapter
            .invoke(&request(json!({ "chart_type": "bar", "bins": 2.5 })))
            .await;
        assert_eq!(
            wrong,
            InvocationResult::failure(
                "parameter 'bins' of chart expects integer, got number",
                true
            )
        );

        let extra = adapter
            .invoke(&request(json!({ "chart_type": "bar", "colour": "red" })))
            .await;
        assert_eq!(
            extra,
            InvocationResult::failure("unexpected parameter 'colour' for chart", true)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_optional_parameter_is_absent() {
        let (adapter, calls) = adapter_with(Behaviour::Succeed);
        let result = adapter
            .invoke(&request(json!({ "chart_type": "bar", "bins": null })))
            .await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_capability_is_fatal() {
        let (adapter, _) = adapter_with(Behaviour::Succeed);
        let result = adapter
            .invoke(&InvocationRequest::new("teleport", Arguments::new()))
            .await;
        assert!(result.is_fatal());
    }

    #[tokio::test]
    async fn tool_classification_is_preserved() {
        let args = json!({ "chart_type": "bar" });

        let (adapter, _) = adapter_with(Behaviour::Recoverable);
        assert_eq!(
            adapter.invoke(&request(args.clone())).await,
            InvocationResult::failure("unsupported chart type", true)
        );

        let (adapter, _) = adapter_with(Behaviour::Fatal);
        assert_eq!(
            adapter.invoke(&request(args.clone())).await,
            InvocationResult::failure("datastore unreachable", false)
        );

        let (adapter, calls) = adapter_with(Behaviour::Panic);
        let result = adapter.invoke(&request(args)).await;
        assert!(!result.is_success() && !result.is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
