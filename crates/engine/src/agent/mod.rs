//! Per-request orchestration: parse the sample, run the tool-calling session,
//! and shape whatever happened into a response body.
//!
//! Business-logic failures never escape as errors. Input problems, model
//! failures and exhausted turn budgets all become a normal [`QueryResponse`].

use std::sync::Arc;

use plotwise_common::api::{QueryRequest, QueryResponse};
use plotwise_common::types::ChartSpec;
use plotwise_common::{PlotwiseError, QueryId};
use tracing::Instrument;

use crate::chart::{ChartGenerator, ChartValidator};
use crate::config::EngineConfig;
use crate::dataset::{Dataset, DatasetError};
use crate::llm::session::{run_session, SessionConfig, SessionEnd, SessionResult};
use crate::llm::{Conversation, LlmCaller, LlmClient};
use crate::sandbox::SubprocessSandbox;
use crate::tools::handlers::register_agent_tools;
use crate::tools::{QueryScope, ToolHandlerContext, ToolRegistry};

pub const MISSING_INPUT_MESSAGE: &str = "Please provide a prompt and CSV data.";
pub const TIMEOUT_MESSAGE: &str =
    "Sorry, I could not complete your request in time. Please try a simpler question.";
pub const APOLOGY_MESSAGE: &str = "Please try again, unfortunately an error occurred.";
const DEFAULT_CHART_TEXT: &str = "Here is the chart based on your query.";

/// Answers natural-language questions about an uploaded sample.
pub struct QueryAgent {
    llm: Arc<dyn LlmCaller>,
    system_prompt: String,
    registry: Arc<ToolRegistry>,
    session_config: SessionConfig,
}

/// Build an LLM client for one role, failing when its credential is absent.
fn role_client(
    config: &EngineConfig,
    role: &plotwise_common::config::LlmRoleConfig,
    name: &str,
) -> Result<Arc<dyn LlmCaller>, PlotwiseError> {
    let client = LlmClient::new(role.clone(), config.system.retry.llm_api.clone()).ok_or_else(
        || {
            PlotwiseError::Config(format!(
                "LLM client for role '{}' could not be created: API key for provider '{}' not set",
                name, role.provider
            ))
        },
    )?;
    Ok(Arc::new(client))
}

impl QueryAgent {
    pub fn new(
        llm: Arc<dyn LlmCaller>,
        system_prompt: String,
        registry: Arc<ToolRegistry>,
        max_turns: u32,
    ) -> Self {
        Self {
            llm,
            system_prompt,
            registry,
            session_config: SessionConfig { max_turns },
        }
    }

    /// Wire the production agent: one LLM client per role, the schema
    /// validator, the subprocess sandbox and the tool catalog.
    pub fn from_config(config: &EngineConfig) -> Result<Self, PlotwiseError> {
        let agent_llm = role_client(config, &config.system.llm.agent, "agent")?;
        let chart_llm = role_client(config, &config.system.llm.chart, "chart")?;
        let code_llm = role_client(config, &config.system.llm.code, "code")?;

        let validator = ChartValidator::from_config(&config.system.validator)?;

        let context = ToolHandlerContext {
            charts: ChartGenerator::new(
                chart_llm,
                Arc::new(validator),
                config.prompt("chart_system").to_string(),
            ),
            code_llm,
            code_system_prompt: config.prompt("code_system").to_string(),
            sandbox: Arc::new(SubprocessSandbox::new(
                config.system.sandbox.clone(),
                config.sandbox_prelude.clone(),
            )),
        };

        let mut registry = ToolRegistry::new(context);
        register_agent_tools(&mut registry);
        registry
            .load_definitions(&config.tool_schemas, "agent")
            .map_err(PlotwiseError::Config)?;

        Ok(Self::new(
            agent_llm,
            config.prompt("agent").to_string(),
            Arc::new(registry),
            config.system.agent.max_turns,
        ))
    }

    /// Answer one request. Always yields a response body.
    pub async fn answer(&self, request: QueryRequest) -> QueryResponse {
        let query_id = QueryId::new();
        let span = tracing::info_span!("query", query_id = %query_id);
        self.answer_inner(request).instrument(span).await
    }

    async fn answer_inner(&self, request: QueryRequest) -> QueryResponse {
        let start = std::time::Instant::now();

        if request.prompt.trim().is_empty() {
            tracing::info!("Rejected query without a prompt");
            metrics::counter!("agent.query.outcome", "outcome" => "input_error").increment(1);
            return QueryResponse::text_only(MISSING_INPUT_MESSAGE);
        }

        let dataset = match Dataset::from_csv(&request.sample_data, request.columns_info.as_deref())
        {
            Ok(ds) => ds,
            Err(e) => {
                tracing::info!(error = %e, "Rejected query with unusable sample data");
                metrics::counter!("agent.query.outcome", "outcome" => "input_error").increment(1);
                return QueryResponse::text_only(match e {
                    DatasetError::Empty => MISSING_INPUT_MESSAGE.to_string(),
                    DatasetError::Parse(_) => {
                        format!("{} The sample data could not be read as CSV.", MISSING_INPUT_MESSAGE)
                    }
                });
            }
        };

        tracing::info!(
            rows = dataset.row_count(),
            columns = dataset.columns().len(),
            "Query received"
        );

        let conversation = Conversation::new(
            self.system_prompt.clone(),
            format_query_message(&request.prompt, &dataset),
        );
        let scope = Arc::new(QueryScope { dataset });
        let executor = self.registry.executor_for(Arc::clone(&scope));

        let result = run_session(
            self.llm.as_ref(),
            conversation,
            self.registry.definitions(),
            &executor,
            &self.session_config,
        )
        .await;

        let duration = start.elapsed().as_secs_f64();
        record_session(&result, duration);

        shape_response(result, &scope.dataset)
    }
}

fn record_session(result: &SessionResult, duration: f64) {
    let outcome = match result.end {
        SessionEnd::Completed { .. } => "completed",
        SessionEnd::MaxTurnsReached => "max_turns",
        SessionEnd::Failed { .. } => "failed",
    };
    let stats = &result.stats;

    metrics::histogram!("agent.query.duration").record(duration);
    metrics::histogram!("agent.session.turns").record(stats.turns as f64);
    metrics::histogram!("agent.session.tool_calls").record(stats.tool_calls as f64);
    metrics::counter!("agent.query.outcome", "outcome" => outcome).increment(1);

    tracing::info!(
        outcome,
        duration_s = duration,
        turns = stats.turns,
        tool_calls = stats.tool_calls,
        tool_errors = stats.tool_errors,
        charts = stats.charts_produced,
        input_tokens = stats.total_input_tokens,
        output_tokens = stats.total_output_tokens,
        "Query session finished"
    );
}

/// Map the session end to the response body.
fn shape_response(result: SessionResult, dataset: &Dataset) -> QueryResponse {
    match result.end {
        SessionEnd::Completed { final_text } => {
            let text = if final_text.trim().is_empty() && !result.chart.is_empty() {
                DEFAULT_CHART_TEXT.to_string()
            } else {
                final_text
            };
            with_chart(text, result.chart, dataset)
        }
        SessionEnd::MaxTurnsReached => with_chart(TIMEOUT_MESSAGE.to_string(), result.chart, dataset),
        SessionEnd::Failed { error } => {
            tracing::error!(error = %error, "Query failed, returning apology");
            QueryResponse::text_only(APOLOGY_MESSAGE)
        }
    }
}

fn with_chart(response: String, chart: ChartSpec, dataset: &Dataset) -> QueryResponse {
    if chart.is_empty() {
        return QueryResponse::text_only(response);
    }

    let cols: Vec<String> = chart
        .encoded_fields()
        .into_iter()
        .filter(|field| dataset.has_column(field))
        .collect();

    QueryResponse {
        response,
        vega_spec: chart.into_value(),
        cols: Some(cols),
    }
}

/// Format the question and a description of the sample into the initial user message.
fn format_query_message(prompt: &str, dataset: &Dataset) -> String {
    format!(
        "## Question\n\n{}\n\n## Data\n\nColumns: {}\nRows: {}\n\nSample (CSV):\n```\n{}```\n\n\
         Use the tools to answer. Tools receive the full sample automatically.\n",
        prompt.trim(),
        dataset.describe_columns(),
        dataset.row_count(),
        dataset.preview(),
    )
}
