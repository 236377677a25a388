use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::tools::registry::{QueryScope, ToolHandler, ToolHandlerContext, ToolOutput};

#[derive(Deserialize)]
struct Args {
    code: String,
}

/// Program errors and timeouts come back as ordinary results for the model
/// to react to; only a sandbox that cannot run at all is a tool error.
pub fn handler() -> ToolHandler {
    Arc::new(
        |args: Value, ctx: Arc<ToolHandlerContext>, scope: Arc<QueryScope>| {
            Box::pin(async move {
                let args: Args = serde_json::from_value(args)
                    .map_err(|e| format!("Invalid arguments: {}", e))?;

                let outcome = ctx
                    .sandbox
                    .execute(&args.code, scope.dataset.csv())
                    .await
                    .map_err(|e| format!("Failed to execute code: {}", e))?;

                Ok(ToolOutput::value(Value::String(
                    outcome.into_tool_text(ctx.sandbox.timeout_ms()),
                )))
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::tools::handlers::tests::{context, scope};
    use serde_json::json;

    #[tokio::test]
    async fn test_stdout_returned_verbatim() {
        let output = handler()(
            json!({"code": "```\necho 4\n```"}),
            context(Arc::new(ScriptedLlm::new())),
            scope(),
        )
        .await
        .unwrap();
        assert_eq!(output.value, Value::String("4\n".into()));
    }

    #[tokio::test]
    async fn test_program_error_is_result_text() {
        let output = handler()(
            json!({"code": "echo 'NameError: name x is not defined' >&2; exit 1"}),
            context(Arc::new(ScriptedLlm::new())),
            scope(),
        )
        .await
        .unwrap();
        assert_eq!(
            output.value,
            Value::String("NameError: name x is not defined".into())
        );
    }

    #[tokio::test]
    async fn test_sample_data_visible_to_program() {
        let output = handler()(
            json!({"code": "head -n 1 data.csv"}),
            context(Arc::new(ScriptedLlm::new())),
            scope(),
        )
        .await
        .unwrap();
        assert_eq!(output.value, Value::String("region,sales\n".into()));
    }
}
