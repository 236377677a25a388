use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::registry::{QueryScope, ToolHandler, ToolHandlerContext, ToolOutput};

#[derive(Deserialize)]
struct Args {
    intent: String,
    /// Defaults to the request's sample data.
    #[serde(default)]
    data: Option<String>,
}

pub fn handler() -> ToolHandler {
    Arc::new(
        |args: Value, ctx: Arc<ToolHandlerContext>, scope: Arc<QueryScope>| {
            Box::pin(async move {
                let args: Args = serde_json::from_value(args)
                    .map_err(|e| format!("Invalid arguments: {}", e))?;

                let data = args.data.as_deref().unwrap_or(scope.dataset.csv());
                let result = ctx
                    .charts
                    .generate(data, &args.intent)
                    .await
                    .map_err(|e| format!("Failed to generate chart: {}", e))?;

                // The specification itself stays out of the conversation.
                let summary = json!({
                    "description": result.description,
                    "valid": result.valid,
                    "mark": result.specification.mark(),
                    "fields": result.specification.encoded_fields(),
                });

                Ok(ToolOutput::with_chart(summary, result.specification))
            })
        },
    )
}
