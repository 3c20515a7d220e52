use crate::error::ToolError;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::Deserialize;
use serde_json::json;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Exits with status 0 when `sys.argv[1]` parses as a single expression and 1
/// otherwise. Nothing from the input is executed.
const PARSE_CHECK: &str = r#"
import ast, sys
try:
    ast.parse(sys.argv[1], mode="eval")
except (SyntaxError, ValueError):
    sys.exit(1)
"#;

/// Evaluates `sys.argv[1]` with globals holding only the builtins
const EVALUATE: &str = r#"
import sys
print(eval(compile(sys.argv[1], "<expression>", "eval"), {"__builtins__": __builtins__}))
"#;

/// Arguments for the RunPythonCode tool
#[derive(Debug, Deserialize)]
pub struct RunPythonCodeArgs {
    /// A single Python expression
    pub code: String,
}

/// Tool evaluating one Python expression in a fresh subprocess
#[derive(Debug, Clone)]
pub struct RunPythonCode {
    python: String,
    timeout: Duration,
}

impl RunPythonCode {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }
}

impl Default for RunPythonCode {
    fn default() -> Self {
        Self::new("python3", Duration::from_secs(2))
    }
}

impl Tool for RunPythonCode {
    const NAME: &'static str = "run_python_code";
    type Error = ToolError;
    type Args = RunPythonCodeArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Runs short, one-line SINGLE-EXPRESSION Python code in its own subprocess.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The one-line, single-expression code to run as a string."
                    }
                },
                "required": ["code"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        timeout(self.timeout, self.evaluate(&args.code))
            .await
            .map_err(|_| ToolError::CommandTimeout(self.timeout))?
    }
}

impl RunPythonCode {
    /// Parse check first, then evaluation, each in its own interpreter
    async fn evaluate(&self, code: &str) -> Result<String, ToolError> {
        let check = self.run_script(PARSE_CHECK, code).await?;
        if !check.status.success() {
            debug!(code = %code, status = ?check.status.code(), "Rejected non-expression input");
            return Err(ToolError::NotSingleExpression);
        }

        let output = self.run_script(EVALUATE, code).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // The last line of a traceback carries the exception
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("process exited with an error")
                .trim()
                .to_string();
            debug!(code = %code, stderr = %stderr, "Python expression failed");
            return Err(ToolError::command_failed(reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_script(&self, script: &str, code: &str) -> Result<Output, ToolError> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-I").arg("-c").arg(script).arg(code);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The child is killed if the timeout drops the output future
        cmd.kill_on_drop(true);

        Ok(cmd.output().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn run(code: &str) -> Result<String, ToolError> {
        RunPythonCode::default()
            .call(RunPythonCodeArgs { code: code.to_string() })
            .await
    }

    #[tokio::test]
    async fn test_expression_output() {
        if !python_available() {
            return;
        }
        assert_eq!(run("1+1").await.unwrap(), "2\n");
        assert_eq!(run("'ab' * 2").await.unwrap(), "abab\n");
    }

    #[tokio::test]
    async fn test_statements_are_rejected() {
        if !python_available() {
            return;
        }
        assert!(matches!(run("x = 1").await, Err(ToolError::NotSingleExpression)));
        assert!(matches!(run("import os").await, Err(ToolError::NotSingleExpression)));
        assert!(matches!(run("1\n2").await, Err(ToolError::NotSingleExpression)));
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported() {
        if !python_available() {
            return;
        }
        match run("1/0").await {
            Err(ToolError::CommandFailed(reason)) => assert!(reason.contains("ZeroDivisionError")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exit_status_is_not_a_parse_rejection() {
        if !python_available() {
            return;
        }
        match run("exit(3)").await {
            Err(ToolError::CommandFailed(reason)) => assert_eq!(reason, "process exited with an error"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expression_sees_only_builtins() {
        if !python_available() {
            return;
        }
        for code in ["sys.argv", "ast", "source"] {
            match run(code).await {
                Err(ToolError::CommandFailed(reason)) => assert!(reason.contains("NameError"), "{}", reason),
                other => panic!("{}: unexpected result: {:?}", code, other),
            }
        }
        assert_eq!(run("len([1, 2, 3])").await.unwrap(), "3\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_long_expression() {
        if !python_available() {
            return;
        }
        let tool = RunPythonCode::new("python3", Duration::from_millis(300));
        let started = std::time::Instant::now();
        let result = tool
            .call(RunPythonCodeArgs {
                code: "__import__('time').sleep(10)".to_string(),
            })
            .await;

        assert!(matches!(result, Err(ToolError::CommandTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_io_error() {
        let tool = RunPythonCode::new("definitely-not-a-python-binary", Duration::from_secs(2));
        let result = tool.call(RunPythonCodeArgs { code: "1".to_string() }).await;
        assert!(matches!(result, Err(ToolError::Io(_))));
    }
}
