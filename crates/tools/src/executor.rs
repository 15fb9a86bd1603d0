//! Tool executor: parameter contracts, deadlines, crash capture.
//!
//! [`ToolExecutor::execute`] never fails. Every outcome, including a
//! missing tool, a panic inside a handler or a blown deadline, comes back
//! as a [`ToolResult`] the loop hands to the model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use holdfast_core::tool::DEFAULT_TOOL_TIMEOUT;
use holdfast_core::{RiskLevel, ToolCall, ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Runs tool calls against a shared registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Same executor over a registry without `names`.
    pub fn without_tools(&self, names: &[&str]) -> Self {
        Self {
            registry: Arc::new(self.registry.without(names)),
            default_timeout: self.default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Risk of the named tool; unknown tools report `Safe` so they fall
    /// through to the `TOOL_NOT_FOUND` result instead of an approval prompt.
    pub fn risk_level(&self, name: &str) -> RiskLevel {
        self.registry
            .get(name)
            .map(|t| t.risk_level())
            .unwrap_or(RiskLevel::Safe)
    }

    /// Whether a call to `name` must wait for a human decision.
    pub fn needs_approval(&self, name: &str, auto_approve: bool) -> bool {
        holdfast_security::needs_approval(self.risk_level(name), auto_approve)
    }

    /// Whether a successful call to `name` changes files.
    pub fn modifies_files(&self, name: &str) -> bool {
        self.registry.get(name).is_some_and(|t| t.modifies_files())
    }

    /// Whether `name` only inspects the project: safe and never writes.
    pub fn is_read_only(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .is_some_and(|t| t.risk_level() == RiskLevel::Safe && !t.modifies_files())
    }

    /// Canonical tool name for `name` (follows aliases).
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.registry.resolve_name(name)
    }

    /// Execute one call.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        let name = self.registry.resolve_name(&call.name).to_string();

        let Some(tool) = self.registry.get(&name) else {
            warn!(tool = %call.name, "Unknown tool requested");
            let err = ToolError::NotFound(format!(
                "{} (available: {})",
                call.name,
                self.registry.names().join(", ")
            ));
            return ToolResult::failed(call, &call.name, &err, 0);
        };

        let arguments = match validate_arguments(&tool.parameters_schema(), &call.arguments) {
            Ok(args) => args,
            Err(err) => {
                debug!(tool = %name, error = %err, "Rejected tool arguments");
                return ToolResult::failed(call, &name, &err, 0);
            }
        };

        if ctx.cancel.is_cancelled() {
            return ToolResult::failed(call, &name, &ToolError::Cancelled, 0);
        }

        let deadline = tool.timeout().unwrap_or(self.default_timeout);
        let task_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { tool.execute(arguments, &task_ctx).await });

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                handle.abort();
                Err(ToolError::Cancelled)
            }
            joined = tokio::time::timeout(deadline, &mut handle) => match joined {
                Err(_) => {
                    handle.abort();
                    warn!(tool = %name, timeout_secs = deadline.as_secs(), "Tool timed out");
                    Err(ToolError::Timeout {
                        tool_name: name.clone(),
                        timeout_secs: deadline.as_secs(),
                    })
                }
                Ok(Err(join_err)) if join_err.is_panic() => {
                    let reason = panic_message(join_err.into_panic());
                    warn!(tool = %name, reason = %reason, "Tool crashed");
                    Err(ToolError::Crashed {
                        tool_name: name.clone(),
                        reason,
                    })
                }
                Ok(Err(_)) => Err(ToolError::Cancelled),
                Ok(Ok(result)) => result,
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                debug!(tool = %name, elapsed_ms, "Tool succeeded");
                ToolResult::ok(call, &name, output, elapsed_ms)
            }
            Err(err) => {
                debug!(tool = %name, elapsed_ms, code = %err.code(), "Tool failed");
                ToolResult::failed(call, &name, &err, elapsed_ms)
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Check `arguments` against the `required` names and property `type`s of a
/// JSON schema. A `null` payload counts as an empty object.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<Value, ToolError> {
    let args = match arguments {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => arguments.clone(),
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "arguments must be a JSON object, got {}",
                json_type(other)
            )));
        }
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| args.get(*name).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }
    }

    if let (Some(props), Some(given)) = (properties, args.as_object()) {
        for (key, value) in given {
            if value.is_null() {
                continue;
            }
            let expected = props
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected
                && !type_matches(expected, value)
            {
                return Err(ToolError::InvalidArguments(format!(
                    "argument '{key}' must be {expected}, got {}",
                    json_type(value)
                )));
            }
        }
    }

    Ok(args)
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
