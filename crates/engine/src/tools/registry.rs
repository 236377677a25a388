use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use plotwise_common::types::ChartSpec;
use serde_json::Value;

use crate::chart::ChartGenerator;
use crate::dataset::Dataset;
use crate::llm::session::{ToolExecutionResult, ToolExecutor};
use crate::llm::types::ToolDefinition;
use crate::llm::LlmCaller;
use crate::sandbox::CodeSandbox;

/// Capabilities shared by all tool handlers, built once at start-up.
pub struct ToolHandlerContext {
    pub charts: ChartGenerator,
    /// Model used by the code-generation tool.
    pub code_llm: Arc<dyn LlmCaller>,
    pub code_system_prompt: String,
    pub sandbox: Arc<dyn CodeSandbox>,
}

/// Per-request state visible to handlers.
pub struct QueryScope {
    pub dataset: Dataset,
}

/// What a handler hands back: a JSON payload and, for the chart tool, the
/// specification that becomes the session's current chart.
#[derive(Debug)]
pub struct ToolOutput {
    pub value: Value,
    pub chart: Option<ChartSpec>,
}

impl ToolOutput {
    pub fn value(value: Value) -> Self {
        Self { value, chart: None }
    }

    pub fn with_chart(value: Value, chart: ChartSpec) -> Self {
        Self {
            value,
            chart: Some(chart),
        }
    }
}

/// Handler function signature: takes args, shared context and request scope.
pub type ToolHandler = Arc<
    dyn Fn(
            Value,
            Arc<ToolHandlerContext>,
            Arc<QueryScope>,
        ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, String>> + Send>>
        + Send
        + Sync,
>;

/// Stable text form of a tool result: strings verbatim, anything else as
/// compact JSON (object keys sorted).
pub fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)
            .unwrap_or_else(|e| format!("{{\"error\": \"Failed to serialize result: {}\"}}", e)),
    }
}

/// Capability table: tool name → (definition, handler).
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
    definitions: Vec<ToolDefinition>,
    context: Arc<ToolHandlerContext>,
}

impl ToolRegistry {
    pub fn new(context: ToolHandlerContext) -> Self {
        Self {
            handlers: HashMap::new(),
            definitions: Vec::new(),
            context: Arc::new(context),
        }
    }

    /// Register a tool handler by name.
    pub fn register(&mut self, name: &str, handler: ToolHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Load tool definitions from the config-loaded schemas for one role
    /// (keys "{role}/{tool}"). Every definition must have a registered
    /// handler and every handler a definition.
    pub fn load_definitions(
        &mut self,
        tool_schemas: &HashMap<String, Value>,
        role: &str,
    ) -> Result<(), String> {
        let prefix = format!("{}/", role);

        for (key, schema) in tool_schemas {
            if !key.starts_with(&prefix) {
                continue;
            }

            let name = schema
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| format!("Tool schema '{}' missing 'name' field", key))?
                .to_string();

            let description = schema
                .get("description")
                .and_then(|v| v.as_str())
                .ok_or_else(|| format!("Tool schema '{}' missing 'description' field", key))?
                .to_string();

            let input_schema = schema
                .get("input_schema")
                .cloned()
                .ok_or_else(|| format!("Tool schema '{}' missing 'input_schema' field", key))?;

            if !self.handlers.contains_key(&name) {
                return Err(format!("Tool '{}' has a schema but no handler", name));
            }
            if self.definitions.iter().any(|d| d.name == name) {
                return Err(format!("Tool '{}' is declared twice", name));
            }

            self.definitions.push(ToolDefinition {
                name,
                description,
                input_schema,
            });
        }

        for name in self.handlers.keys() {
            if !self.definitions.iter().any(|d| &d.name == name) {
                return Err(format!("Tool '{}' has a handler but no schema", name));
            }
        }

        // HashMap order is arbitrary; keep the catalog sent to the model stable.
        self.definitions.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            role = role,
            tools = self.definitions.len(),
            "Loaded tool definitions"
        );

        Ok(())
    }

    /// Get the tool definitions for sending to the LLM.
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Create a ToolExecutor closure bound to one request, for `run_session`.
    pub fn executor_for(&self, scope: Arc<QueryScope>) -> ToolExecutor {
        let handlers = self.handlers.clone();
        let context = Arc::clone(&self.context);

        Box::new(move |name: String, args: Value| {
            let handlers = handlers.clone();
            let context = Arc::clone(&context);
            let scope = Arc::clone(&scope);

            Box::pin(async move { dispatch_with(&handlers, context, scope, name, args).await })
        })
    }
}

async fn dispatch_with(
    handlers: &HashMap<String, ToolHandler>,
    context: Arc<ToolHandlerContext>,
    scope: Arc<QueryScope>,
    name: String,
    args: Value,
) -> ToolExecutionResult {
    let start = std::time::Instant::now();

    tracing::info!(tool = %name, "Tool call started");

    let Some(handler) = handlers.get(&name) else {
        tracing::warn!(tool = %name, "Unknown tool called");
        metrics::counter!("tools.execution.errors", "tool" => name.clone()).increment(1);
        return ToolExecutionResult {
            content: format!("Unknown tool: '{}'. Use only the tools provided.", name),
            is_error: true,
            chart: None,
        };
    };

    let result = handler(args, context, scope).await;

    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("tools.execution.latency", "tool" => name.clone()).record(latency);
    metrics::counter!("tools.execution.count", "tool" => name.clone()).increment(1);

    match result {
        Ok(output) => {
            let content = result_text(&output.value);
            tracing::info!(
                tool = %name,
                latency_s = latency,
                result_len = content.len(),
                chart = output.chart.is_some(),
                "Tool call succeeded"
            );
            ToolExecutionResult {
                content,
                is_error: false,
                chart: output.chart,
            }
        }
        Err(msg) => {
            tracing::warn!(
                tool = %name,
                latency_s = latency,
                error = %msg,
                "Tool call failed"
            );
            metrics::counter!("tools.execution.errors", "tool" => name).increment(1);
            ToolExecutionResult {
                content: msg,
                is_error: true,
                chart: None,
            }
        }
    }
}
