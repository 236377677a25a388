mod cache;
pub mod validator;

use std::sync::Arc;

use plotwise_common::types::{ChartResult, ChartSpec};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{LlmCaller, LlmError, Message};
use crate::sandbox::sanitize;

pub use validator::{ChartValidator, HttpSchemaSource, SchemaError, SchemaSource, StaticSchemaSource};

const ILL_FORMED: &str =
    "The generated chart specification is ill-formed and cannot be used. Please refine your query.";

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("Chart model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Chart reply is not the expected JSON object: {0}")]
    MalformedOutput(String),
}

/// Shape the chart model must answer with.
#[derive(Debug, Deserialize)]
struct ChartReply {
    specification: Value,
    description: String,
}

fn parse_reply(text: &str) -> Result<ChartReply, ChartError> {
    let cleaned = sanitize(text);
    serde_json::from_str(&cleaned).map_err(|e| ChartError::MalformedOutput(e.to_string()))
}

/// Turns a data sample and an intent into a validated chart specification.
pub struct ChartGenerator {
    llm: Arc<dyn LlmCaller>,
    validator: Arc<ChartValidator>,
    system_prompt: String,
}

impl ChartGenerator {
    pub fn new(llm: Arc<dyn LlmCaller>, validator: Arc<ChartValidator>, system_prompt: String) -> Self {
        Self {
            llm,
            validator,
            system_prompt,
        }
    }

    fn user_prompt(data: &str, intent: &str) -> String {
        format!(
            "Generate a JSON object with exactly two fields:\n\
             1. \"specification\": a valid Vega-Lite JSON specification built from this data:\n{}\n\
             based on this request: {}\n\
             2. \"description\": a brief textual description explaining the chart.\n\
             Respond with the JSON object only.",
            data.trim_end(),
            intent
        )
    }

    /// One model call, no retries here. A reply that cannot be parsed or does
    /// not validate degrades to an explanatory result with an empty chart.
    pub async fn generate(&self, data: &str, intent: &str) -> Result<ChartResult, ChartError> {
        let messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(Self::user_prompt(data, intent)),
        ];

        let response = self.llm.chat(&messages, &[]).await?;
        let text = response.text.unwrap_or_default();

        let reply = match parse_reply(&text) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Chart reply could not be parsed");
                metrics::counter!("chart.generation.malformed").increment(1);
                return Ok(ChartResult::degraded(ILL_FORMED));
            }
        };

        if !reply.specification.is_object() || !self.validator.validate(&reply.specification).await {
            metrics::counter!("chart.generation.invalid").increment(1);
            return Ok(ChartResult::degraded(ILL_FORMED));
        }

        let spec = ChartSpec::new(reply.specification);
        tracing::info!(mark = ?spec.mark(), fields = ?spec.encoded_fields(), "Chart generated");
        metrics::counter!("chart.generation.valid").increment(1);
        Ok(ChartResult::valid(reply.description, spec))
    }
}
