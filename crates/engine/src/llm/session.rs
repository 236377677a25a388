use std::future::Future;
use std::pin::Pin;

use plotwise_common::types::ChartSpec;

use super::conversation::Conversation;
use super::types::ToolDefinition;
use super::LlmCaller;

/// How an agentic session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// LLM responded with text only (no tool calls).
    Completed { final_text: String },
    /// The model still wanted tools when the turn budget ran out.
    MaxTurnsReached,
    /// A model request failed; no usable answer.
    Failed { error: String },
}

/// Result of a finished agentic session.
#[derive(Debug)]
pub struct SessionResult {
    pub end: SessionEnd,
    /// Last chart produced during the session, `{}` if none.
    pub chart: ChartSpec,
    pub stats: SessionStats,
    /// Final state of the conversation log.
    pub transcript: Conversation,
}

/// Accumulated statistics for a session.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub turns: u32,
    pub tool_calls: u32,
    pub tool_errors: u32,
    pub charts_produced: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Configuration for the agentic loop.
pub struct SessionConfig {
    pub max_turns: u32,
}

/// Result from executing a single tool call.
#[derive(Debug)]
pub struct ToolExecutionResult {
    /// Text fed back to the model.
    pub content: String,
    pub is_error: bool,
    /// Set by the chart tool; becomes the session's current chart.
    pub chart: Option<ChartSpec>,
}

/// Closure type for the tool executor passed to `run_session`.
pub type ToolExecutor = Box<
    dyn Fn(String, serde_json::Value) -> Pin<Box<dyn Future<Output = ToolExecutionResult> + Send>>
        + Send
        + Sync,
>;

/// Run the tool-calling loop over one conversation.
///
/// Model requests and tool dispatches happen strictly one after another. Each
/// tool call is answered by exactly one tool-result message before the next
/// model request.
pub async fn run_session(
    llm: &dyn LlmCaller,
    conversation: Conversation,
    tools: &[ToolDefinition],
    tool_executor: &ToolExecutor,
    config: &SessionConfig,
) -> SessionResult {
    let mut conversation = conversation;
    let mut chart = ChartSpec::empty();
    let mut stats = SessionStats::default();

    loop {
        if stats.turns >= config.max_turns {
            tracing::warn!(turns = stats.turns, "Session hit max turns limit");
            return SessionResult {
                end: SessionEnd::MaxTurnsReached,
                chart,
                stats,
                transcript: conversation,
            };
        }

        stats.turns += 1;

        debug_assert!(conversation.unanswered_calls().is_empty());

        let response = match llm.chat(conversation.messages(), tools).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, turn = stats.turns, "LLM API error during session");
                return SessionResult {
                    end: SessionEnd::Failed {
                        error: e.to_string(),
                    },
                    chart,
                    stats,
                    transcript: conversation,
                };
            }
        };

        stats.total_input_tokens += response.usage.input_tokens;
        stats.total_output_tokens += response.usage.output_tokens;

        // No tool calls → session complete.
        if response.tool_calls.is_empty() {
            let final_text = response.text.clone().unwrap_or_default();
            conversation = conversation.with_assistant(response.text, Vec::new());
            return SessionResult {
                end: SessionEnd::Completed { final_text },
                chart,
                stats,
                transcript: conversation,
            };
        }

        let calls = response.tool_calls;
        conversation = conversation.with_assistant(response.text, calls.clone());

        for call in &calls {
            stats.tool_calls += 1;
            let result = tool_executor(call.name.clone(), call.arguments.clone()).await;

            if result.is_error {
                stats.tool_errors += 1;
            }

            // Last writer wins.
            if let Some(produced) = result.chart {
                stats.charts_produced += 1;
                chart = produced;
            }

            conversation = conversation.with_tool_result(call, result.content, result.is_error);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
