use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use plotwise_common::config::ValidatorConfig;
use serde_json::Value;
use tokio::sync::RwLock;

use super::cache::SchemaCache;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Schema request returned HTTP {0}")]
    Status(u16),

    #[error("Schema could not be compiled: {0}")]
    Compile(String),
}

impl From<SchemaError> for plotwise_common::PlotwiseError {
    fn from(e: SchemaError) -> Self {
        plotwise_common::PlotwiseError::Schema(e.to_string())
    }
}

/// Where the chart-grammar schema document comes from.
pub trait SchemaSource: Send + Sync {
    /// Cache key and log label for the document.
    fn location(&self) -> &str;

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Value, SchemaError>> + Send + '_>>;
}

/// Downloads the schema over HTTP.
pub struct HttpSchemaSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSchemaSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SchemaError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl SchemaSource for HttpSchemaSource {
    fn location(&self) -> &str {
        &self.url
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Value, SchemaError>> + Send + '_>> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let response = self.http.get(&self.url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SchemaError::Status(status.as_u16()));
            }
            let schema: Value = response.json().await?;
            metrics::histogram!("chart.schema_fetch.latency").record(start.elapsed().as_secs_f64());
            Ok(schema)
        })
    }
}

/// A fixed, in-memory schema document.
pub struct StaticSchemaSource {
    label: String,
    schema: Value,
}

impl StaticSchemaSource {
    pub fn new(label: impl Into<String>, schema: Value) -> Self {
        Self {
            label: label.into(),
            schema,
        }
    }
}

impl SchemaSource for StaticSchemaSource {
    fn location(&self) -> &str {
        &self.label
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Value, SchemaError>> + Send + '_>> {
        let schema = self.schema.clone();
        Box::pin(async move { Ok(schema) })
    }
}

/// Checks chart specifications for structural conformance to the schema.
///
/// Fails closed: a schema that cannot be obtained or compiled makes every
/// specification invalid.
pub struct ChartValidator {
    source: Arc<dyn SchemaSource>,
    cache: RwLock<SchemaCache<Arc<jsonschema::Validator>>>,
}

impl ChartValidator {
    pub fn new(source: Arc<dyn SchemaSource>, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(SchemaCache::new(cache_ttl)),
        }
    }

    /// Validator backed by the configured schema URL.
    pub fn from_config(config: &ValidatorConfig) -> Result<Self, SchemaError> {
        let source = HttpSchemaSource::new(
            config.schema_url.clone(),
            Duration::from_millis(config.fetch_timeout_ms),
        )?;
        Ok(Self::new(
            Arc::new(source),
            Duration::from_secs(config.cache_ttl_seconds),
        ))
    }

    async fn compiled(&self) -> Result<Arc<jsonschema::Validator>, SchemaError> {
        let location = self.source.location();
        if let Some(validator) = self.cache.read().await.get(location) {
            return Ok(validator);
        }

        let schema = self.source.fetch().await?;
        // Large grammars take a while to compile; keep it off the async workers.
        let validator = tokio::task::spawn_blocking(move || {
            jsonschema::validator_for(&schema).map_err(|e| SchemaError::Compile(e.to_string()))
        })
        .await
        .map_err(|e| SchemaError::Compile(e.to_string()))??;
        let validator = Arc::new(validator);

        self.cache
            .write()
            .await
            .insert(location.to_string(), Arc::clone(&validator));

        tracing::debug!(schema = %location, "Compiled chart schema");
        Ok(validator)
    }

    /// True only on full conformance. Never errors; failures are logged.
    pub async fn validate(&self, spec: &Value) -> bool {
        let validator = match self.compiled().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    schema = %self.source.location(),
                    error = %e,
                    "Chart schema unavailable, treating specification as invalid"
                );
                metrics::counter!("chart.validation.schema_errors").increment(1);
                return false;
            }
        };

        match validator.validate(spec) {
            Ok(()) => {
                metrics::counter!("chart.validation.valid").increment(1);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chart specification failed validation");
                metrics::counter!("chart.validation.invalid").increment(1);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A reduced chart grammar: the required top-level fields and their shapes.
    pub(crate) fn test_schema() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["$schema", "data", "mark", "encoding"],
            "properties": {
                "$schema": {"type": "string"},
                "data": {
                    "type": "object",
                    "required": ["values"],
                    "properties": {
                        "values": {"type": "array", "items": {"type": "object"}}
                    }
                },
                "mark": {
                    "anyOf": [
                        {"type": "string"},
                        {"type": "object", "required": ["type"]}
                    ]
                },
                "encoding": {
                    "type": "object",
                    "additionalProperties": {
                        "anyOf": [
                            {
                                "type": "object",
                                "properties": {
                                    "field": {"type": "string"},
                                    "type": {"enum": ["quantitative", "nominal", "ordinal", "temporal"]}
                                }
                            },
                            {"type": "array"}
                        ]
                    }
                }
            }
        })
    }

    pub(crate) fn example_spec() -> Value {
        json!({
            "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
            "data": {
                "values": [
                    {"category": "A", "group": "x", "value": 0.1},
                    {"category": "C", "group": "y", "value": 0.6},
                    {"category": "B", "group": "x", "value": 0.7}
                ]
            },
            "mark": "bar",
            "encoding": {
                "x": {"field": "category"},
                "y": {"field": "value", "type": "quantitative"},
                "xOffset": {"field": "group"},
                "color": {"field": "group"}
            }
        })
    }

    pub(crate) fn static_validator() -> ChartValidator {
        ChartValidator::new(
            Arc::new(StaticSchemaSource::new("test-schema", test_schema())),
            Duration::from_secs(3600),
        )
    }

    struct CountingSource {
        fetches: AtomicU32,
        fail: bool,
    }

    impl SchemaSource for CountingSource {
        fn location(&self) -> &str {
            "counting"
        }

        fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Value, SchemaError>> + Send + '_>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    Err(SchemaError::Status(503))
                } else {
                    Ok(test_schema())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_example_spec_is_valid() {
        assert!(static_validator().validate(&example_spec()).await);
    }

    #[tokio::test]
    async fn test_missing_mark_is_invalid() {
        let mut spec = example_spec();
        spec.as_object_mut().unwrap().remove("mark");
        assert!(!static_validator().validate(&spec).await);
    }

    #[tokio::test]
    async fn test_wrong_nesting_is_invalid() {
        let mut spec = example_spec();
        spec["data"] = json!({"values": "region,sales"});
        assert!(!static_validator().validate(&spec).await);

        let mut spec = example_spec();
        spec["encoding"]["y"]["type"] = json!("numberish");
        assert!(!static_validator().validate(&spec).await);
    }

    #[tokio::test]
    async fn test_unavailable_schema_fails_closed() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: true,
        });
        let validator = ChartValidator::new(source, Duration::from_secs(3600));
        assert!(!validator.validate(&example_spec()).await);
    }

    #[tokio::test]
    async fn test_uncompilable_schema_fails_closed() {
        let source = Arc::new(StaticSchemaSource::new(
            "broken",
            json!({"type": 12}),
        ));
        let validator = ChartValidator::new(source, Duration::from_secs(3600));
        assert!(!validator.validate(&example_spec()).await);
    }

    #[tokio::test]
    async fn test_schema_cached_within_ttl() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: false,
        });
        let validator = ChartValidator::new(source.clone(), Duration::from_secs(3600));
        assert!(validator.validate(&example_spec()).await);
        assert!(validator.validate(&example_spec()).await);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_fetches_every_time() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            fail: false,
        });
        let validator = ChartValidator::new(source.clone(), Duration::ZERO);
        assert!(validator.validate(&example_spec()).await);
        assert!(validator.validate(&example_spec()).await);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }
}
