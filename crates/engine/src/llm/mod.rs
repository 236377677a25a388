mod anthropic;
pub mod conversation;
mod openai;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use plotwise_common::config::{LlmRoleConfig, RetryConfig};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use conversation::Conversation;
pub use types::{
    LlmResponse, Message, OutputContract, StopReason, TokenUsage, ToolCall, ToolDefinition,
};

/// LLM API client with provider dispatch and retry logic.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmRoleConfig,
    retry_config: RetryConfig,
    api_key: String,
}

/// Errors from LLM API calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM auth error: {0}")]
    Auth(String),

    #[error("LLM rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("LLM context window exceeded: {0}")]
    ContextWindowExceeded(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    /// The provider answered, but not in the shape the output contract demands.
    #[error("Malformed provider output: {0}")]
    MalformedOutput(String),
}

impl LlmError {
    /// Whether this error should not be retried.
    fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Auth(_) | LlmError::ContextWindowExceeded(_) | LlmError::MalformedOutput(_)
        )
    }
}

/// Decode a structured-output payload into its typed form.
///
/// A payload that does not fit `T` violates the output contract.
pub fn decode_structured<T: DeserializeOwned>(value: Value) -> Result<T, LlmError> {
    serde_json::from_value(value).map_err(|e| LlmError::MalformedOutput(e.to_string()))
}

impl LlmClient {
    /// Create a new LLM client.
    /// Reads the API key from the appropriate env var based on provider.
    /// Returns None if the key is not set.
    pub fn new(config: LlmRoleConfig, retry_config: RetryConfig) -> Option<Self> {
        let env_var = match config.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            "openai" => "OPENAI_API_KEY",
            other => {
                tracing::warn!(provider = other, "Unknown LLM provider");
                return None;
            }
        };

        let api_key = match std::env::var(env_var) {
            Ok(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    env_var = env_var,
                    provider = config.provider.as_str(),
                    "API key not set, LLM client disabled for this role"
                );
                return None;
            }
        };

        Some(Self {
            http: reqwest::Client::new(),
            config,
            retry_config,
            api_key,
        })
    }

    /// Send a chat request (optionally offering tools) with retry logic.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        self.with_retry(move || self.send_once(messages, tools))
            .await
    }

    /// Request an object matching `contract`, with retry logic on transport errors.
    pub async fn structured(
        &self,
        messages: &[Message],
        contract: &OutputContract,
    ) -> Result<Value, LlmError> {
        self.with_retry(move || self.send_structured_once(messages, contract))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;
        let mut backoff_ms = self.retry_config.initial_backoff_ms;

        loop {
            attempt += 1;
            let result = op().await;

            match result {
                Ok(value) => return Ok(value),
                Err(ref e) if e.is_non_retryable() => {
                    metrics::counter!("llm.api.errors", "provider" => self.config.provider.clone())
                        .increment(1);
                    return result;
                }
                Err(LlmError::RateLimited { retry_after }) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("llm.api.errors", "provider" => self.config.provider.clone())
                            .increment(1);
                        return Err(LlmError::RateLimited { retry_after });
                    }
                    let wait = retry_after.map(|s| s * 1000).unwrap_or(backoff_ms);
                    tracing::warn!(attempt, wait_ms = wait, "LLM rate limited, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                }
                Err(e) => {
                    if attempt >= self.retry_config.max_attempts {
                        metrics::counter!("llm.api.errors", "provider" => self.config.provider.clone())
                            .increment(1);
                        return Err(e);
                    }
                    let jitter = if self.retry_config.jitter {
                        compute_jitter(attempt, backoff_ms)
                    } else {
                        0
                    };
                    let wait = backoff_ms + jitter;
                    tracing::warn!(attempt, wait_ms = wait, error = %e, "LLM API error, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                    backoff_ms = (backoff_ms as f64 * self.retry_config.backoff_multiplier) as u64;
                    backoff_ms = backoff_ms.min(self.retry_config.max_backoff_ms);
                }
            }
        }
    }

    /// Single attempt, routed to the provider-specific implementation.
    async fn send_once(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        match self.config.provider.as_str() {
            "anthropic" => {
                anthropic::send_messages(
                    &self.http,
                    &self.api_key,
                    &self.config,
                    messages,
                    tools,
                    None,
                )
                .await
            }
            "openai" => {
                openai::send_chat_completion(
                    &self.http,
                    &self.api_key,
                    &self.config,
                    messages,
                    tools,
                    None,
                )
                .await
            }
            other => Err(LlmError::Api(format!("Unknown provider: {}", other))),
        }
    }

    async fn send_structured_once(
        &self,
        messages: &[Message],
        contract: &OutputContract,
    ) -> Result<Value, LlmError> {
        match self.config.provider.as_str() {
            "anthropic" => {
                let response = anthropic::send_messages(
                    &self.http,
                    &self.api_key,
                    &self.config,
                    messages,
                    &[],
                    Some(contract),
                )
                .await?;
                anthropic::extract_structured(response, contract)
            }
            "openai" => {
                let response = openai::send_chat_completion(
                    &self.http,
                    &self.api_key,
                    &self.config,
                    messages,
                    &[],
                    Some(contract),
                )
                .await?;
                openai::extract_structured(response)
            }
            other => Err(LlmError::Api(format!("Unknown provider: {}", other))),
        }
    }
}

/// Compute jitter for retry backoff using simple hash-based approach.
fn compute_jitter(attempt: u32, backoff_ms: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    hasher.finish() % (backoff_ms / 2 + 1)
}

/// Boxed future returned by [`LlmCaller`] methods.
pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// Object-safe trait for testability (dyn dispatch).
/// Tests provide scripted callers; production uses LlmClient.
pub trait LlmCaller: Send + Sync {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> LlmFuture<'a, LlmResponse>;

    fn structured<'a>(
        &'a self,
        messages: &'a [Message],
        contract: &'a OutputContract,
    ) -> LlmFuture<'a, Value>;
}

impl LlmCaller for LlmClient {
    fn chat<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> LlmFuture<'a, LlmResponse> {
        Box::pin(self.chat(messages, tools))
    }

    fn structured<'a>(
        &'a self,
        messages: &'a [Message],
        contract: &'a OutputContract,
    ) -> LlmFuture<'a, Value> {
        Box::pin(self.structured(messages, contract))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Payload {
        code: String,
    }

    #[test]
    fn test_decode_structured_accepts_contract_shape() {
        let payload: Payload = decode_structured(json!({"code": "print(1)"})).unwrap();
        assert_eq!(payload.code, "print(1)");
    }

    #[test]
    fn test_decode_structured_rejects_contract_violation() {
        let err = decode_structured::<Payload>(json!({"program": "print(1)"})).unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput(_)));
        assert!(err.is_non_retryable());
    }

    #[test]
    fn test_jitter_is_bounded() {
        for attempt in 1..5 {
            assert!(compute_jitter(attempt, 1000) <= 500);
        }
    }
}
