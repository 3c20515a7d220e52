//! Tools the model can call during a turn.
//!
//! Each tool is a rig [`Tool`] in its own module. The [`ToolRegistry`] maps
//! declared names to handlers and produces the observation text that is fed
//! back to the model.

mod get_date;
mod registry;
mod run_python_code;

pub use get_date::GetDate;
pub use registry::{Observation, ToolRegistry};
pub use run_python_code::RunPythonCode;

use crate::error::ToolError;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde_json::Value;

/// Object-safe view of a tool, as stored in the registry
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name the model uses to call this tool
    fn tool_name(&self) -> &'static str;

    async fn declaration(&self) -> ToolDefinition;

    /// Decode `args` and run the tool
    async fn invoke(&self, args: Value) -> Result<String, ToolError>;
}

#[async_trait]
impl<T> ToolHandler for T
where
    T: Tool<Output = String, Error = ToolError> + Sync,
{
    fn tool_name(&self) -> &'static str {
        T::NAME
    }

    async fn declaration(&self) -> ToolDefinition {
        Tool::definition(self, String::new()).await
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let tool_args: T::Args = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments(e.to_string()))?;
        self.call(tool_args).await
    }
}

/// Registry with the built-in tools
pub fn builtin_registry(python: &str, code_timeout: std::time::Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(GetDate);
    registry.register(RunPythonCode::new(python, code_timeout));
    registry
}
