use super::loader::{ConfigError, EngineConfig};

/// Prompts the service cannot run without.
pub const REQUIRED_PROMPTS: &[&str] = &["agent", "chart_system", "code_system"];

/// Tools the agent catalog must declare.
pub const REQUIRED_AGENT_TOOLS: &[&str] = &["execute_code", "generate_chart", "generate_code"];

const PROVIDERS: &[&str] = &["openai", "anthropic"];

/// Validate the complete engine configuration.
///
/// Checks sane ranges on numeric parameters and cross-validates
/// that referenced prompts and tool schemas exist. The service refuses to
/// start on validation failure.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_agent(config, &mut errors);
    validate_llm(config, &mut errors);
    validate_retry(config, &mut errors);
    validate_validator(config, &mut errors);
    validate_sandbox(config, &mut errors);
    validate_server(config, &mut errors);
    validate_files(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_agent(config: &EngineConfig, errors: &mut Vec<String>) {
    if config.system.agent.max_turns == 0 {
        errors.push("agent.max_turns must be > 0".into());
    }
}

fn validate_llm(config: &EngineConfig, errors: &mut Vec<String>) {
    let validate_role =
        |role: &plotwise_common::config::LlmRoleConfig, name: &str, errors: &mut Vec<String>| {
            if !PROVIDERS.contains(&role.provider.as_str()) {
                errors.push(format!(
                    "llm.{}.provider must be one of {:?}, got '{}'",
                    name, PROVIDERS, role.provider
                ));
            }
            if role.model.is_empty() {
                errors.push(format!("llm.{}.model must not be empty", name));
            }
            if role.max_tokens == 0 {
                errors.push(format!("llm.{}.max_tokens must be > 0", name));
            }
            if let Some(temp) = role.temperature {
                if !(0.0..=2.0).contains(&temp) {
                    errors.push(format!(
                        "llm.{}.temperature must be between 0.0 and 2.0",
                        name
                    ));
                }
            }
        };

    validate_role(&config.system.llm.agent, "agent", errors);
    validate_role(&config.system.llm.chart, "chart", errors);
    validate_role(&config.system.llm.code, "code", errors);
}

fn validate_retry(config: &EngineConfig, errors: &mut Vec<String>) {
    let rc = &config.system.retry.llm_api;

    if rc.max_attempts == 0 {
        errors.push("retry.llm_api.max_attempts must be > 0".into());
    }
    if rc.initial_backoff_ms == 0 {
        errors.push("retry.llm_api.initial_backoff_ms must be > 0".into());
    }
    if rc.max_backoff_ms < rc.initial_backoff_ms {
        errors.push("retry.llm_api.max_backoff_ms must be >= initial_backoff_ms".into());
    }
    if rc.backoff_multiplier < 1.0 {
        errors.push("retry.llm_api.backoff_multiplier must be >= 1.0".into());
    }
}

fn validate_validator(config: &EngineConfig, errors: &mut Vec<String>) {
    let v = &config.system.validator;

    if !(v.schema_url.starts_with("http://") || v.schema_url.starts_with("https://")) {
        errors.push("validator.schema_url must be an http(s) URL".into());
    }
    if v.fetch_timeout_ms == 0 {
        errors.push("validator.fetch_timeout_ms must be > 0".into());
    }
}

fn validate_sandbox(config: &EngineConfig, errors: &mut Vec<String>) {
    let s = &config.system.sandbox;

    if s.interpreter.is_empty() {
        errors.push("sandbox.interpreter must not be empty".into());
    }
    if s.script_name.is_empty() || s.script_name.contains(['/', '\\']) || s.script_name == "data.csv" {
        errors.push("sandbox.script_name must be a plain file name other than data.csv".into());
    }
    if s.timeout_ms == 0 {
        errors.push("sandbox.timeout_ms must be > 0".into());
    }
    if s.max_output_chars == 0 {
        errors.push("sandbox.max_output_chars must be > 0".into());
    }
    if s.memory_limit_mb < 16 {
        errors.push("sandbox.memory_limit_mb must be >= 16".into());
    }
}

fn validate_server(config: &EngineConfig, errors: &mut Vec<String>) {
    if config.system.server.static_dir.is_empty() {
        errors.push("server.static_dir must not be empty".into());
    }
}

fn validate_files(config: &EngineConfig, errors: &mut Vec<String>) {
    for name in REQUIRED_PROMPTS {
        match config.prompts.get(*name) {
            None => errors.push(format!("prompts/{}.md is missing", name)),
            Some(text) if text.trim().is_empty() => {
                errors.push(format!("prompts/{}.md is empty", name))
            }
            Some(_) => {}
        }
    }

    for tool in REQUIRED_AGENT_TOOLS {
        let key = format!("agent/{}", tool);
        if !config.tool_schemas.contains_key(&key) {
            errors.push(format!("tools/{}.json is missing", key));
        }
    }
}
