use plotwise_common::config::LlmRoleConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{
    LlmResponse, Message, OutputContract, StopReason, TokenUsage, ToolCall, ToolDefinition,
};
use super::LlmError;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    stop_reason: String,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(default)]
    r#type: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

/// Split the log into the top-level system prompt and user/assistant turns.
///
/// Consecutive tool results are folded into one user turn, as the Messages API
/// expects every `tool_use` to be answered in the immediately following message.
fn to_wire(messages: &[Message]) -> (String, Vec<AnthropicMessage>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut wire: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        match msg {
            Message::System { content } => system_parts.push(content),
            Message::User { content } => wire.push(AnthropicMessage {
                role: "user".into(),
                content: vec![AnthropicContentBlock::Text {
                    text: content.clone(),
                }],
            }),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if let Some(text) = content.as_ref().filter(|t| !t.is_empty()) {
                    blocks.push(AnthropicContentBlock::Text { text: text.clone() });
                }
                blocks.extend(tool_calls.iter().map(|call| AnthropicContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                wire.push(AnthropicMessage {
                    role: "assistant".into(),
                    content: blocks,
                });
            }
            Message::Tool {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let block = AnthropicContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: is_error.then_some(true),
                };
                let continues_results = wire.last().is_some_and(|last| {
                    last.role == "user"
                        && last
                            .content
                            .iter()
                            .all(|b| matches!(b, AnthropicContentBlock::ToolResult { .. }))
                });
                match wire.last_mut() {
                    Some(last) if continues_results => last.content.push(block),
                    _ => wire.push(AnthropicMessage {
                        role: "user".into(),
                        content: vec![block],
                    }),
                }
            }
        }
    }

    (system_parts.join("\n\n"), wire)
}

fn from_wire_response(resp: AnthropicResponse) -> LlmResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            AnthropicResponseBlock::Text { text } => text_parts.push(text),
            AnthropicResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
        }
    }

    let stop_reason = match resp.stop_reason.as_str() {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    };

    LlmResponse {
        text: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        },
        tool_calls,
        stop_reason,
        usage: TokenUsage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
    }
}

/// The contract is offered as the only tool and the model is forced to call it;
/// its input is the structured payload.
pub fn extract_structured(
    response: LlmResponse,
    contract: &OutputContract,
) -> Result<Value, LlmError> {
    response
        .tool_calls
        .into_iter()
        .find(|call| call.name == contract.name)
        .map(|call| call.arguments)
        .ok_or_else(|| {
            LlmError::MalformedOutput(format!("Model did not call '{}'", contract.name))
        })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a messages request to the Anthropic API.
pub async fn send_messages(
    http: &reqwest::Client,
    api_key: &str,
    config: &LlmRoleConfig,
    messages: &[Message],
    tools: &[ToolDefinition],
    contract: Option<&OutputContract>,
) -> Result<LlmResponse, LlmError> {
    let start = std::time::Instant::now();

    let (system, wire_messages) = to_wire(messages);

    let (wire_tools, tool_choice) = match contract {
        Some(contract) => (
            vec![AnthropicTool {
                name: contract.name.clone(),
                description: contract.description.clone(),
                input_schema: contract.schema.clone(),
            }],
            Some(json!({"type": "tool", "name": contract.name})),
        ),
        None => (
            tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
            None,
        ),
    };

    let request = AnthropicRequest {
        model: &config.model,
        max_tokens: config.max_tokens,
        system,
        messages: wire_messages,
        tools: wire_tools,
        tool_choice,
        temperature: config.temperature,
    };

    let response = http
        .post(ANTHROPIC_MESSAGES_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    let status = response.status();
    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("llm.api.latency", "provider" => "anthropic", "model" => config.model.clone())
        .record(latency);

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Auth(format!("{}: {}", status, body)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(LlmError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<AnthropicError>(&body);
        let msg = match parsed {
            Ok(e) => {
                if e.error.r#type == "invalid_request_error"
                    && e.error.message.contains("context window")
                {
                    return Err(LlmError::ContextWindowExceeded(e.error.message));
                }
                e.error.message
            }
            Err(_) => body,
        };
        return Err(LlmError::Api(format!("{}: {}", status, msg)));
    }

    let body: AnthropicResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse Anthropic response: {}", e)))?;

    let llm_response = from_wire_response(body);

    metrics::counter!("llm.api.input_tokens", "provider" => "anthropic")
        .increment(llm_response.usage.input_tokens);
    metrics::counter!("llm.api.output_tokens", "provider" => "anthropic")
        .increment(llm_response.usage.output_tokens);

    Ok(llm_response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
