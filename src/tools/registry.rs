use super::ToolHandler;
use crate::error::{ToolError, TurnError};
use rig::completion::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const OBSERVATION_PREFIX: &str = "Observation: ";

/// Text fed back to the model after a tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub text: String,
    pub failed: bool,
}

impl Observation {
    pub fn success(output: &str) -> Self {
        Self {
            text: format!("{}{}", OBSERVATION_PREFIX, output),
            failed: false,
        }
    }

    pub fn error(error: &ToolError) -> Self {
        Self {
            text: format!("{}Error: {}", OBSERVATION_PREFIX, error),
            failed: true,
        }
    }
}

/// Named tool handlers, in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<&'static str, Arc<dyn ToolHandler>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later handler with the same name replaces the earlier one.
    pub fn register<H: ToolHandler + 'static>(&mut self, handler: H) {
        let name = handler.tool_name();
        if self.handlers.insert(name, Arc::new(handler)).is_none() {
            self.order.push(name);
        }
    }

    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn ToolHandler>, TurnError> {
        self.handlers
            .get(name)
            .ok_or_else(|| TurnError::UnknownTool(name.to_string()))
    }

    /// Declarations for every registered tool, in registration order
    pub async fn declarations(&self) -> Vec<ToolDefinition> {
        let mut declarations = Vec::with_capacity(self.order.len());
        for name in &self.order {
            declarations.push(self.handlers[name].declaration().await);
        }
        declarations
    }

    /// Invoke `name` with decoded `args`.
    ///
    /// Only an undeclared tool is an error; failures inside the tool come back
    /// as an error observation so the model can correct itself.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Observation, TurnError> {
        let handler = self.get(name)?;

        let observation = match handler.invoke(args).await {
            Ok(output) => Observation::success(&output),
            Err(e) => {
                debug!(tool = name, error = %e, "Tool call failed");
                Observation::error(&e)
            }
        };

        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{GetDate, RunPythonCode};
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(GetDate);
        registry.register(RunPythonCode::new("python3", Duration::from_secs(2)));
        registry
    }

    #[tokio::test]
    async fn test_declarations_follow_registration_order() {
        let registry = registry();
        let declarations = registry.declarations().await;

        let names: Vec<_> = declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["get_date", "run_python_code"]);
        assert_eq!(registry.names(), &["get_date", "run_python_code"]);

        for declaration in &declarations {
            assert_eq!(declaration.parameters["additionalProperties"], json!(false));
            assert_eq!(declaration.parameters["required"].as_array().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_turn_error() {
        let result = registry().dispatch("launch_rockets", json!({})).await;
        assert!(matches!(result, Err(TurnError::UnknownTool(ref name)) if name == "launch_rockets"));
    }

    #[tokio::test]
    async fn test_invalid_timezone_becomes_observation() {
        let observation = registry()
            .dispatch("get_date", json!({"timezone": "Invalid/Zone"}))
            .await
            .unwrap();

        assert!(observation.failed);
        assert_eq!(
            observation.text,
            "Observation: Error: Invalid IANA timezone string: Invalid/Zone"
        );
    }

    #[tokio::test]
    async fn test_missing_argument_becomes_observation() {
        let observation = registry()
            .dispatch("get_date", json!({"tz": "UTC"}))
            .await
            .unwrap();

        assert!(observation.failed);
        assert!(observation.text.starts_with("Observation: Error: Invalid arguments:"));
    }

    #[tokio::test]
    async fn test_python_expression_observation() {
        let python_available = std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !python_available {
            return;
        }

        let observation = registry()
            .dispatch("run_python_code", json!({"code": "1+1"}))
            .await
            .unwrap();

        assert!(!observation.failed);
        assert_eq!(observation.text, "Observation: 2\n");
    }

    #[tokio::test]
    async fn test_successful_call_is_prefixed() {
        let observation = registry()
            .dispatch("get_date", json!({"timezone": "UTC"}))
            .await
            .unwrap();

        assert!(!observation.failed);
        assert!(observation.text.starts_with("Observation: "));
        assert!(observation.text.ends_with("+00:00"));
    }
}
