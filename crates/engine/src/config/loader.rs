use std::collections::HashMap;
use std::path::{Path, PathBuf};

use plotwise_common::config::SystemConfig;
use serde_json::Value;

use super::validation;

/// Complete engine configuration loaded from the config directory.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Parsed system.toml.
    pub system: SystemConfig,
    /// Tool schemas keyed by "{role}/{tool_name}" (e.g. "agent/execute_code").
    pub tool_schemas: HashMap<String, Value>,
    /// Prompt templates keyed by filename stem (e.g. "agent", "chart_system").
    pub prompts: HashMap<String, String>,
    /// Source prepended to every sandboxed program, if `sandbox/prelude.*` exists.
    pub sandbox_prelude: Option<String>,
}

impl EngineConfig {
    /// Prompt template by name. Presence is checked by validation.
    pub fn prompt(&self, name: &str) -> &str {
        self.prompts.get(name).map(String::as_str).unwrap_or_default()
    }
}

/// Load all configuration from the given config directory.
///
/// Fails loudly with clear error messages if anything is misconfigured.
/// The service refuses to start on validation failure.
pub fn load_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    // 1. Load and parse system.toml
    let system_path = config_dir.join("system.toml");
    let system = load_system_config(&system_path)?;

    // 2. Load tool schemas from config/tools/{role}/*.json
    let tool_schemas = load_tool_schemas(&config_dir.join("tools"))?;

    // 3. Load prompt templates from config/prompts/*.md
    let prompts = load_prompts(&config_dir.join("prompts"))?;

    // 4. Optional sandbox prelude from config/sandbox/prelude.*
    let sandbox_prelude = load_prelude(&config_dir.join("sandbox"))?;

    let config = EngineConfig {
        system,
        tool_schemas,
        prompts,
        sandbox_prelude,
    };

    // 5. Validate everything
    validation::validate(&config)?;

    tracing::info!(
        tool_schemas = config.tool_schemas.len(),
        prompts = config.prompts.len(),
        prelude = config.sandbox_prelude.is_some(),
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn load_tool_schemas(tools_dir: &Path) -> Result<HashMap<String, Value>, ConfigError> {
    let mut schemas = HashMap::new();

    if !tools_dir.exists() {
        tracing::warn!(
            path = %tools_dir.display(),
            "Tools directory does not exist, no tool schemas loaded"
        );
        return Ok(schemas);
    }

    // Iterate over role directories (agent/)
    let entries = std::fs::read_dir(tools_dir).map_err(|e| ConfigError::FileRead {
        path: tools_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::FileRead {
            path: tools_dir.to_path_buf(),
            source: e,
        })?;

        let role_path = entry.path();
        if !role_path.is_dir() {
            continue;
        }

        let role_name = role_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        let role_entries = std::fs::read_dir(&role_path).map_err(|e| ConfigError::FileRead {
            path: role_path.clone(),
            source: e,
        })?;

        for file_entry in role_entries {
            let file_entry = file_entry.map_err(|e| ConfigError::FileRead {
                path: role_path.clone(),
                source: e,
            })?;

            let file_path = file_entry.path();
            if file_path.extension().is_some_and(|ext| ext == "json") {
                let tool_name = file_path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or("unknown");

                let content =
                    std::fs::read_to_string(&file_path).map_err(|e| ConfigError::FileRead {
                        path: file_path.clone(),
                        source: e,
                    })?;

                let schema: Value =
                    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                        path: file_path.clone(),
                        detail: e.to_string(),
                    })?;

                let key = format!("{}/{}", role_name, tool_name);
                tracing::debug!(tool = %key, "Loaded tool schema");
                schemas.insert(key, schema);
            }
        }
    }

    Ok(schemas)
}

fn load_prompts(prompts_dir: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let mut prompts = HashMap::new();

    if !prompts_dir.exists() {
        tracing::warn!(
            path = %prompts_dir.display(),
            "Prompts directory does not exist, no prompts loaded"
        );
        return Ok(prompts);
    }

    let entries = std::fs::read_dir(prompts_dir).map_err(|e| ConfigError::FileRead {
        path: prompts_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::FileRead {
            path: prompts_dir.to_path_buf(),
            source: e,
        })?;

        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext == "md" || ext == "txt")
        {
            let name = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();

            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;

            tracing::debug!(prompt = %name, "Loaded prompt template");
            prompts.insert(name, content);
        }
    }

    Ok(prompts)
}

fn load_prelude(sandbox_dir: &Path) -> Result<Option<String>, ConfigError> {
    if !sandbox_dir.exists() {
        return Ok(None);
    }

    let entries = std::fs::read_dir(sandbox_dir).map_err(|e| ConfigError::FileRead {
        path: sandbox_dir.to_path_buf(),
        source: e,
    })?;

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::FileRead {
            path: sandbox_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_file() && path.file_stem().is_some_and(|stem| stem == "prelude") {
            candidates.push(path);
        }
    }

    match candidates.as_slice() {
        [] => Ok(None),
        [path] => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %path.display(), "Loaded sandbox prelude");
            Ok(Some(content))
        }
        _ => Err(ConfigError::Validation(format!(
            "more than one sandbox prelude in {}",
            sandbox_dir.display()
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}
