//! End-to-end agent scenarios against a scripted model.
//!
//! Live-provider tests are `#[ignore]`: run with `cargo test -- --ignored`
//! with OPENAI_API_KEY set and python3 on PATH.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plotwise_common::api::{QueryRequest, QueryResponse};
use serde_json::{json, Value};

use plotwise_engine::agent::{QueryAgent, TIMEOUT_MESSAGE};
use plotwise_engine::chart::{ChartGenerator, ChartValidator, StaticSchemaSource};
use plotwise_engine::llm::{
    LlmCaller, LlmError, LlmFuture, LlmResponse, Message, OutputContract, ToolCall,
    ToolDefinition,
};
use plotwise_engine::sandbox::{CodeSandbox, ExecutionOutcome, SandboxError};
use plotwise_engine::tools::handlers::register_agent_tools;
use plotwise_engine::tools::{ToolHandlerContext, ToolRegistry};

const SALES: &str = "region,sales\nWest,10\nEast,7\nNorth,3\n";

/// Scripted model: tool-calling requests, plain chart requests and
/// structured code requests each replay their own queue.
#[derive(Default)]
struct ScriptedModel {
    agent: Mutex<Vec<LlmResponse>>,
    chart: Mutex<Vec<LlmResponse>>,
    code: Mutex<Vec<Value>>,
    agent_requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn agent(self, response: LlmResponse) -> Self {
        self.agent.lock().unwrap().insert(0, response);
        self
    }

    fn chart(self, response: LlmResponse) -> Self {
        self.chart.lock().unwrap().insert(0, response);
        self
    }

    fn code(self, payload: Value) -> Self {
        self.code.lock().unwrap().insert(0, payload);
        self
    }
}

impl LlmCaller for ScriptedModel {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> LlmFuture<'a, LlmResponse> {
        let next = if tools.is_empty() {
            self.chart.lock().unwrap().pop()
        } else {
            self.agent_requests.lock().unwrap().push(messages.to_vec());
            self.agent.lock().unwrap().pop()
        };
        Box::pin(async move { next.ok_or_else(|| LlmError::Api("script exhausted".into())) })
    }

    fn structured<'a>(
        &'a self,
        _messages: &'a [Message],
        _contract: &'a OutputContract,
    ) -> LlmFuture<'a, Value> {
        let next = self.code.lock().unwrap().pop();
        Box::pin(async move { next.ok_or_else(|| LlmError::Api("script exhausted".into())) })
    }
}

/// Sandbox that records programs and prints a fixed result.
#[derive(Default)]
struct RecordingSandbox {
    programs: Mutex<Vec<String>>,
}

impl CodeSandbox for RecordingSandbox {
    fn execute<'a>(
        &'a self,
        code: &'a str,
        _data_csv: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome, SandboxError>> + Send + 'a>> {
        self.programs.lock().unwrap().push(code.to_string());
        Box::pin(async {
            Ok(ExecutionOutcome {
                output: "20\n".into(),
                error: None,
                timed_out: false,
            })
        })
    }

    fn timeout_ms(&self) -> u64 {
        1000
    }
}

fn chart_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["$schema", "data", "mark", "encoding"],
        "properties": {
            "data": {
                "type": "object",
                "required": ["values"],
                "properties": {"values": {"type": "array", "items": {"type": "object"}}}
            },
            "mark": {"anyOf": [{"type": "string"}, {"type": "object", "required": ["type"]}]},
            "encoding": {"type": "object"}
        }
    })
}

fn tool_schemas() -> std::collections::HashMap<String, Value> {
    ["generate_chart", "generate_code", "execute_code"]
        .into_iter()
        .map(|name| {
            (
                format!("agent/{}", name),
                json!({
                    "name": name,
                    "description": name,
                    "input_schema": {"type": "object"}
                }),
            )
        })
        .collect()
}

fn build_agent(model: Arc<ScriptedModel>, sandbox: Arc<RecordingSandbox>) -> QueryAgent {
    let validator = ChartValidator::new(
        Arc::new(StaticSchemaSource::new("test", chart_schema())),
        Duration::from_secs(60),
    );
    let mut registry = ToolRegistry::new(ToolHandlerContext {
        charts: ChartGenerator::new(model.clone(), Arc::new(validator), "charts".into()),
        code_llm: model.clone(),
        code_system_prompt: "code".into(),
        sandbox,
    });
    register_agent_tools(&mut registry);
    registry.load_definitions(&tool_schemas(), "agent").unwrap();
    QueryAgent::new(model, "analyst".into(), Arc::new(registry), 10)
}

fn call(id: &str, name: &str, arguments: Value) -> LlmResponse {
    LlmResponse::tool_calls(vec![ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }])
}

fn chart_reply(mark: Option<&str>) -> LlmResponse {
    let mut spec = json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "data": {"values": [{"region": "West", "sales": 10}, {"region": "East", "sales": 7}]},
        "encoding": {
            "x": {"field": "region", "type": "nominal"},
            "y": {"field": "sales", "type": "quantitative"}
        }
    });
    if let Some(mark) = mark {
        spec["mark"] = json!(mark);
    }
    LlmResponse::text(json!({"specification": spec, "description": "Sales by region"}).to_string())
}

async fn ask(agent: &QueryAgent, prompt: &str, data: &str) -> QueryResponse {
    agent
        .answer(QueryRequest {
            prompt: prompt.into(),
            sample_data: data.into(),
            columns_info: None,
        })
        .await
}

#[tokio::test]
async fn test_sales_by_region_produces_chart() {
    let model = Arc::new(
        ScriptedModel::default()
            .agent(call("c1", "generate_chart", json!({"intent": "bar chart of sales by region"})))
            .chart(chart_reply(Some("bar")))
            .agent(LlmResponse::text("West leads with 10 in sales.")),
    );
    let agent = build_agent(model.clone(), Arc::default());

    let response = ask(&agent, "show sales by region", SALES).await;

    assert_eq!(response.response, "West leads with 10 in sales.");
    assert!(response.vega_spec.get("mark").is_some());
    let encoding = serde_json::to_string(&response.vega_spec["encoding"]).unwrap();
    assert!(encoding.contains("\"region\""));
    assert!(encoding.contains("\"sales\""));
    assert_eq!(
        response.cols,
        Some(vec!["region".to_string(), "sales".to_string()])
    );

    // The chart tool result was fed back under the call's id before the second request.
    let requests = model.agent_requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    match requests[1].last() {
        Some(Message::Tool { tool_call_id, .. }) => assert_eq!(tool_call_id, "c1"),
        other => panic!("expected tool result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_irrelevant_prompt_gets_text_and_empty_chart() {
    let model = Arc::new(ScriptedModel::default().agent(LlmResponse::text(
        "Your question is not related to the uploaded data (columns: region, sales).",
    )));
    let agent = build_agent(model, Arc::default());

    let response = ask(&agent, "who won the 1998 world cup?", SALES).await;

    assert!(response.response.contains("not related"));
    assert_eq!(response.vega_spec, json!({}));
    assert!(response.cols.is_none());
}

#[tokio::test]
async fn test_empty_data_is_answered_without_model() {
    let model = Arc::new(ScriptedModel::default());
    let agent = build_agent(model.clone(), Arc::default());

    let response = ask(&agent, "show sales by region", "").await;

    assert!(response.response.contains("CSV"));
    assert_eq!(response.vega_spec, json!({}));
    assert!(model.agent_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_computed_answer_via_code_tools() {
    let sandbox = Arc::new(RecordingSandbox::default());
    let model = Arc::new(
        ScriptedModel::default()
            .agent(call("g1", "generate_code", json!({"task": "total sales"})))
            .code(json!({"code": "print(sum(r['sales'] for r in rows))"}))
            .agent(call(
                "e1",
                "execute_code",
                json!({"code": "```python\nprint(sum(r['sales'] for r in rows))\n```"}),
            ))
            .agent(LlmResponse::text("Total sales are 20.")),
    );
    let agent = build_agent(model.clone(), sandbox.clone());

    let response = ask(&agent, "what are total sales?", SALES).await;

    assert_eq!(response.response, "Total sales are 20.");
    assert_eq!(response.vega_spec, json!({}));
    assert_eq!(sandbox.programs.lock().unwrap().len(), 1);

    let requests = model.agent_requests.lock().unwrap();
    let results: Vec<String> = requests[2]
        .iter()
        .filter_map(|m| match m {
            Message::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        vec![
            "print(sum(r['sales'] for r in rows))".to_string(),
            "20\n".to_string()
        ]
    );
}

#[tokio::test]
async fn test_second_chart_failing_validation_clears_chart() {
    let model = Arc::new(
        ScriptedModel::default()
            .agent(call("c1", "generate_chart", json!({"intent": "bars"})))
            .chart(chart_reply(Some("bar")))
            .agent(call("c2", "generate_chart", json!({"intent": "something else"})))
            .chart(chart_reply(None))
            .agent(LlmResponse::text("Done.")),
    );
    let agent = build_agent(model, Arc::default());

    let response = ask(&agent, "show sales by region", SALES).await;

    assert_eq!(response.vega_spec, json!({}));
}

#[tokio::test]
async fn test_model_that_never_stops_hits_turn_limit() {
    let mut model = ScriptedModel::default();
    for i in 0..20 {
        model = model.agent(call(&format!("x{}", i), "execute_code", json!({"code": "print(1)"})));
    }
    let model = Arc::new(model);
    let sandbox = Arc::new(RecordingSandbox::default());
    let agent = build_agent(model.clone(), sandbox.clone());

    let response = ask(&agent, "loop forever", SALES).await;

    assert_eq!(response.response, TIMEOUT_MESSAGE);
    assert_eq!(model.agent_requests.lock().unwrap().len(), 10);
    assert_eq!(sandbox.programs.lock().unwrap().len(), 10);
}

#[tokio::test]
#[ignore] // requires OPENAI_API_KEY, network access and python3
async fn test_live_sales_by_region() {
    let config_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
    let config = plotwise_engine::config::load_config(&config_dir).unwrap();
    let agent = QueryAgent::from_config(&config).unwrap();

    let response = ask(&agent, "show sales by region", SALES).await;

    assert!(response.vega_spec.get("mark").is_some(), "{:?}", response);
    let cols = response.cols.unwrap_or_default();
    assert!(cols.contains(&"region".to_string()));
    assert!(cols.contains(&"sales".to_string()));
}
