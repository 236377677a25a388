use thiserror::Error;

/// Errors that stop the service from starting.
///
/// Request-time problems never reach this type: they are recovered into a
/// degraded response body inside the engine.
#[derive(Debug, Error)]
pub enum PlotwiseError {
    #[error("Chart schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
