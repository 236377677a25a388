pub mod handlers;
pub mod registry;

pub use registry::{QueryScope, ToolHandler, ToolHandlerContext, ToolOutput, ToolRegistry};
