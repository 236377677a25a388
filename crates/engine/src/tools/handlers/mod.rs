mod execute_code;
mod generate_chart;
mod generate_code;

use super::registry::ToolRegistry;

/// Register the query agent's tool handlers with the registry.
pub fn register_agent_tools(registry: &mut ToolRegistry) {
    registry.register("generate_chart", generate_chart::handler());
    registry.register("generate_code", generate_code::handler());
    registry.register("execute_code", execute_code::handler());
}
