use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{decode_structured, Message, OutputContract};
use crate::tools::registry::{QueryScope, ToolHandler, ToolHandlerContext, ToolOutput};

#[derive(Deserialize)]
struct Args {
    task: String,
}

/// Structured reply of the code model.
#[derive(Deserialize)]
struct GeneratedCode {
    code: String,
}

fn code_contract() -> OutputContract {
    OutputContract {
        name: "analysis_code".into(),
        description: "Python code that prints what the task asks for.".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Complete Python program. Print every result."
                }
            },
            "required": ["code"],
            "additionalProperties": false
        }),
    }
}

pub fn handler() -> ToolHandler {
    Arc::new(
        |args: Value, ctx: Arc<ToolHandlerContext>, scope: Arc<QueryScope>| {
            Box::pin(async move {
                let args: Args = serde_json::from_value(args)
                    .map_err(|e| format!("Invalid arguments: {}", e))?;

                // The same sample `execute_code` runs against.
                let data = scope.dataset.csv();
                let messages = vec![
                    Message::system(ctx.code_system_prompt.clone()),
                    Message::user(format!(
                        "Data sample (CSV, loaded for you as `rows` and `columns`):\n{}\n\nTask: {}",
                        data.trim_end(),
                        args.task
                    )),
                ];

                let contract = code_contract();
                let payload = ctx
                    .code_llm
                    .structured(&messages, &contract)
                    .await
                    .map_err(|e| format!("Failed to generate code: {}", e))?;
                let generated: GeneratedCode = decode_structured(payload)
                    .map_err(|e| format!("Failed to generate code: {}", e))?;

                Ok(ToolOutput::value(Value::String(generated.code)))
            })
        },
    )
}
