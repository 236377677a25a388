use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from system.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub agent: AgentLimits,
    pub llm: LlmConfig,
    pub retry: RetryDefaults,
    pub validator: ValidatorConfig,
    pub sandbox: SandboxConfig,
    pub server: ServerConfig,
}

/// Bounds on the tool-calling loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Model requests per query before the loop gives up with a timeout answer.
    pub max_turns: u32,
}

/// LLM provider and model configuration per role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Drives the tool-calling conversation.
    pub agent: LlmRoleConfig,
    /// Writes chart specifications.
    pub chart: LlmRoleConfig,
    /// Writes analysis code under a structured-output contract.
    pub code: LlmRoleConfig,
}

/// Configuration for a single LLM role.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRoleConfig {
    /// Provider name ("openai" or "anthropic").
    pub provider: String,
    /// Model identifier (e.g. "gpt-4o-mini").
    pub model: String,
    /// Max tokens in the response.
    pub max_tokens: u32,
    /// Temperature (0.0–2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Retry parameters per target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub llm_api: RetryConfig,
}

/// Retry configuration for a specific target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

/// Chart schema validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Location of the chart-grammar JSON schema.
    pub schema_url: String,
    /// How long a compiled schema is reused. 0 fetches on every validation.
    pub cache_ttl_seconds: u64,
    /// Timeout for a single schema download.
    pub fetch_timeout_ms: u64,
}

/// Code execution sandbox settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter executable, resolved through PATH.
    pub interpreter: String,
    /// Arguments placed before the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// File name the program is written to inside the scratch directory.
    pub script_name: String,
    /// Wall-clock limit for one execution.
    pub timeout_ms: u64,
    /// Output beyond this many characters is cut, keeping the tail.
    pub max_output_chars: usize,
    /// Address-space ceiling handed to the prelude.
    pub memory_limit_mb: u64,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory holding index.html for the landing page.
    pub static_dir: String,
}
