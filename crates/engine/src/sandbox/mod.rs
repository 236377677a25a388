//! Sandboxed execution of model-generated analysis code.
//!
//! Code never runs inside the engine process. [`CodeSandbox`] is the execution
//! port; [`SubprocessSandbox`] backs it with a short-lived interpreter process
//! confined to a scratch directory, a cleared environment and a wall-clock
//! timeout, with resource ceilings applied by the prelude.

mod sanitize;
mod subprocess;

use std::future::Future;
use std::pin::Pin;

pub use sanitize::sanitize;
pub use subprocess::SubprocessSandbox;

/// What one execution produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Everything the program wrote to stdout, verbatim (tail-truncated if huge).
    pub output: String,
    /// Textual form of the failure, when the program did not exit cleanly.
    pub error: Option<String>,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    /// Text handed back to the model: the error if there was one, else stdout.
    pub fn into_tool_text(self, timeout_ms: u64) -> String {
        if self.timed_out {
            return format!("Execution timed out after {} ms", timeout_ms);
        }
        match self.error {
            Some(error) => error,
            None => self.output,
        }
    }
}

/// Infrastructure failures; program errors are reported in [`ExecutionOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        source: std::io::Error,
    },
}

/// Execution port: run `code` against the request's sample data.
pub trait CodeSandbox: Send + Sync {
    fn execute<'a>(
        &'a self,
        code: &'a str,
        data_csv: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome, SandboxError>> + Send + 'a>>;

    /// Wall-clock limit applied to each execution.
    fn timeout_ms(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_text_prefers_error() {
        let ok = ExecutionOutcome {
            output: "4\n".into(),
            error: None,
            timed_out: false,
        };
        assert_eq!(ok.into_tool_text(1000), "4\n");

        let failed = ExecutionOutcome {
            output: "partial\n".into(),
            error: Some("ZeroDivisionError: division by zero".into()),
            timed_out: false,
        };
        assert_eq!(
            failed.into_tool_text(1000),
            "ZeroDivisionError: division by zero"
        );

        let slow = ExecutionOutcome {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(slow.into_tool_text(1500), "Execution timed out after 1500 ms");
    }
}
