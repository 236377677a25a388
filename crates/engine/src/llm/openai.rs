use plotwise_common::config::LlmRoleConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{
    LlmResponse, Message, OutputContract, StopReason, TokenUsage, ToolCall, ToolDefinition,
};
use super::LlmError;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize)]
struct ChatTool {
    r#type: String,
    function: ChatFunction,
}

#[derive(Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    r#type: String,
    function: ChatToolCallFunction,
}

#[derive(Serialize, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn to_wire_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::System { content } => ChatMessage::plain("system", content),
            Message::User { content } => ChatMessage::plain("user", content),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let wire_calls: Vec<ChatToolCall> = tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        r#type: "function".into(),
                        function: ChatToolCallFunction {
                            name: call.name.clone(),
                            arguments: serde_json::to_string(&call.arguments).unwrap_or_default(),
                        },
                    })
                    .collect();

                ChatMessage {
                    role: "assistant".into(),
                    content: content.clone(),
                    tool_calls: if wire_calls.is_empty() {
                        None
                    } else {
                        Some(wire_calls)
                    },
                    tool_call_id: None,
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => ChatMessage {
                role: "tool".into(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        })
        .collect()
}

fn response_format(contract: &OutputContract) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": contract.name,
            "description": contract.description,
            "schema": contract.schema,
            "strict": true,
        }
    })
}

fn from_wire_response(resp: ChatResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("Empty choices array".into()))?;

    if let Some(refusal) = choice.message.refusal {
        return Err(LlmError::MalformedOutput(format!("Model refused: {}", refusal)));
    }

    let text = choice.message.content.filter(|t| !t.is_empty());

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::Object(serde_json::Map::new())),
            id: tc.id,
            name: tc.function.name,
        })
        .collect();

    let stop_reason = match choice.finish_reason.as_str() {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    };

    Ok(LlmResponse {
        text,
        tool_calls,
        stop_reason,
        usage: TokenUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    })
}

/// Pull the contract object out of a `json_schema` response.
pub fn extract_structured(response: LlmResponse) -> Result<Value, LlmError> {
    if response.stop_reason == StopReason::MaxTokens {
        return Err(LlmError::MalformedOutput(
            "Structured output truncated at max_tokens".into(),
        ));
    }
    let text = response
        .text
        .ok_or_else(|| LlmError::MalformedOutput("Structured response had no content".into()))?;
    serde_json::from_str(&text).map_err(|e| LlmError::MalformedOutput(e.to_string()))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Send a chat completion request to the OpenAI API.
///
/// With a `contract`, the request asks for a `json_schema` response format and
/// no tools are offered.
pub async fn send_chat_completion(
    http: &reqwest::Client,
    api_key: &str,
    config: &LlmRoleConfig,
    messages: &[Message],
    tools: &[ToolDefinition],
    contract: Option<&OutputContract>,
) -> Result<LlmResponse, LlmError> {
    let start = std::time::Instant::now();

    let wire_tools: Vec<ChatTool> = tools
        .iter()
        .map(|t| ChatTool {
            r#type: "function".into(),
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect();

    let request = ChatRequest {
        model: &config.model,
        max_tokens: config.max_tokens,
        messages: to_wire_messages(messages),
        tools: wire_tools,
        temperature: config.temperature,
        response_format: contract.map(response_format),
    };

    let response = http
        .post(OPENAI_CHAT_URL)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| LlmError::Http(e.to_string()))?;

    let status = response.status();
    let latency = start.elapsed().as_secs_f64();
    metrics::histogram!("llm.api.latency", "provider" => "openai", "model" => config.model.clone())
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
        let parsed = serde_json::from_str::<OpenAiError>(&body);
        let msg = match parsed {
            Ok(e) => {
                if e.error.message.contains("context_length_exceeded")
                    || e.error.message.contains("maximum context length")
                {
                    return Err(LlmError::ContextWindowExceeded(e.error.message));
                }
                e.error.message
            }
            Err(_) => body,
        };
        return Err(LlmError::Api(format!("{}: {}", status, msg)));
    }

    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| LlmError::Parse(format!("Failed to parse OpenAI response: {}", e)))?;

    let llm_response = from_wire_response(body)?;

    metrics::counter!("llm.api.input_tokens", "provider" => "openai")
        .increment(llm_response.usage.input_tokens);
    metrics::counter!("llm.api.output_tokens", "provider" => "openai")
        .increment(llm_response.usage.output_tokens);

    Ok(llm_response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
