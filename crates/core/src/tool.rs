//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on a project:
//! read and edit files, run shell commands, search, keep a todo list.
//! The registry is a closed mapping from name to tool record; the loop never
//! dispatches through anything more dynamic than a name lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolErrorCode};
use crate::todo::TodoLedger;

/// Default handler deadline when a tool does not declare its own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A model-issued request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// String argument lookup, tolerant of a missing key.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// How dangerous a tool is; controls whether a human must approve each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// What a handler returns on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text shown to the model
    pub content: String,

    /// Optional structured data for the loop (changed paths, verification)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Structured failure carried by a failed [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: ToolErrorCode,
    pub message: String,
    pub recoverable: bool,
}

impl From<&ToolError> for ToolFailure {
    fn from(err: &ToolError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.recoverable(),
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Canonical name of the tool that ran
    pub tool_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Set when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,

    /// Wall-clock time spent in the handler
    pub elapsed_ms: u64,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, tool_name: &str, output: ToolOutput, elapsed_ms: u64) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: tool_name.to_string(),
            success: true,
            output: output.content,
            data: output.data,
            error: None,
            elapsed_ms,
        }
    }

    pub fn failed(call: &ToolCall, tool_name: &str, err: &ToolError, elapsed_ms: u64) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: tool_name.to_string(),
            success: false,
            output: format!("Error [{}]: {err}", err.code()),
            data: None,
            error: Some(ToolFailure::from(err)),
            elapsed_ms,
        }
    }

    pub fn error_code(&self) -> Option<ToolErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Text the model sees for this result.
    pub fn to_model_text(&self) -> String {
        self.output.clone()
    }
}

/// Runs a delegated instruction as an isolated child agent.
#[async_trait]
pub trait SubAgentSpawner: Send + Sync {
    async fn spawn(&self, instruction: String, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Session-scoped collaborators handed to a tool handler.
///
/// Deliberately narrower than the session: a handler can touch the todo
/// ledger and spawn a sub-agent, but never the conversation.
#[derive(Clone)]
pub struct ToolContext {
    pub project_root: PathBuf,
    pub session_id: String,
    pub model_id: String,
    pub todos: Arc<TodoLedger>,
    pub spawner: Option<Arc<dyn SubAgentSpawner>>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(project_root: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            session_id: session_id.into(),
            model_id: String::new(),
            todos: Arc::new(TodoLedger::new()),
            spawner: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_todos(mut self, todos: Arc<TodoLedger>) -> Self {
        self.todos = todos;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn SubAgentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("project_root", &self.project_root)
            .field("session_id", &self.session_id)
            .field("model_id", &self.model_id)
            .field("has_spawner", &self.spawner.is_some())
            .finish()
    }
}

/// The core Tool trait.
///
/// Each built-in tool implements this trait and is registered in the
/// [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "run_command", "edit_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Risk classification used for approval gating.
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    /// Handler deadline; `None` means the executor default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether a successful call changes files on disk.
    fn modifies_files(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Read-only once the host has finished registering; shared across sessions
/// behind an `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Make `alias` resolve to the tool registered as `canonical`.
    pub fn alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    /// Canonical name for `name`, following one level of aliasing.
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        if self.tools.contains_key(name) {
            return name;
        }
        self.aliases.get(name).map(|s| s.as_str()).unwrap_or(name)
    }

    /// Get a tool by name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(self.resolve_name(name)).cloned()
    }

    /// Get all tool definitions (for sending to the model), sorted by name
    /// so the request is stable across runs.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// A copy of this registry without the named tools.
    pub fn without(&self, excluded: &[&str]) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| !excluded.contains(&name.as_str()))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        let aliases = self
            .aliases
            .iter()
            .filter(|(_, target)| !excluded.contains(&target.as_str()))
            .map(|(a, t)| (a.clone(), t.clone()))
            .collect();
        Self { tools, aliases }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(arguments["text"].as_str().unwrap_or("")))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_resolves_aliases() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.alias("say", "echo");
        assert_eq!(registry.resolve_name("say"), "echo");
        assert_eq!(registry.get("say").unwrap().name(), "echo");
        assert_eq!(registry.resolve_name("unknown"), "unknown");
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn registry_without_drops_tool_and_its_aliases() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.alias("say", "echo");
        let trimmed = registry.without(&["echo"]);
        assert!(trimmed.get("echo").is_none());
        assert!(trimmed.get("say").is_none());
    }

    #[tokio::test]
    async fn default_risk_is_safe() {
        let tool = EchoTool;
        assert_eq!(tool.risk_level(), RiskLevel::Safe);
        let ctx = ToolContext::new("/proj", "s1");
        let out = tool
            .execute(serde_json::json!({"text": "hello world"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "hello world");
    }

    #[test]
    fn failed_result_carries_code() {
        let call = ToolCall::new("c1", "edit_file", serde_json::json!({}));
        let result = ToolResult::failed(&call, "edit_file", &ToolError::MultipleMatches { count: 2 }, 3);
        assert!(!result.success);
        assert_eq!(result.error_code(), Some(ToolErrorCode::MultipleMatches));
        assert!(result.output.starts_with("Error [MULTIPLE_MATCHES]"));
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }
}
