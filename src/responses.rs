//! Streaming client for the OpenAI Responses API.

use crate::error::BackendError;
use crate::history::Turn;
use crate::stream::{OutputItem, StreamEvent};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use rig::completion::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Decoded events of one streamed response, in arrival order
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

/// Whether the model may call tools in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// Function tool declaration in the Responses API shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub strict: bool,
    pub parameters: Value,
}

impl From<ToolDefinition> for FunctionTool {
    fn from(definition: ToolDefinition) -> Self {
        Self {
            kind: "function",
            name: definition.name,
            description: definition.description,
            strict: true,
            parameters: definition.parameters,
        }
    }
}

/// Everything a single backend call needs besides the model
#[derive(Debug, Clone, Default)]
pub struct ResponseRequest {
    pub input: Vec<Turn>,
    pub instructions: Option<String>,
    pub tools: Vec<FunctionTool>,
    pub tool_choice: Option<ToolChoice>,
}

/// A backend able to stream a model response
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream(&self, request: &ResponseRequest) -> Result<EventStream, BackendError>;
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    input: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    tools: &'a [FunctionTool],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    stream: bool,
}

/// HTTP client for `POST {base_url}/responses`
#[derive(Clone)]
pub struct ResponsesClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ResponsesClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn body<'a>(&'a self, request: &'a ResponseRequest) -> RequestBody<'a> {
        RequestBody {
            model: &self.model,
            input: &request.input,
            instructions: request.instructions.as_deref(),
            tools: &request.tools,
            tool_choice: request.tool_choice,
            stream: true,
        }
    }
}

#[async_trait]
impl CompletionBackend for ResponsesClient {
    async fn stream(&self, request: &ResponseRequest) -> Result<EventStream, BackendError> {
        let url = format!("{}/responses", self.base_url);
        debug!(url = %url, turns = request.input.len(), tool_choice = ?request.tool_choice, "Sending response request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let events = response.bytes_stream().eventsource().filter_map(|frame| async move {
            match frame {
                Ok(frame) if frame.data == "[DONE]" => None,
                Ok(frame) => {
                    trace!(data = %frame.data, "Responses SSE");
                    Some(decode_event(&frame.data))
                }
                Err(e) => Some(Err(BackendError::Stream(e.to_string()))),
            }
        });

        Ok(Box::pin(events))
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: WireItem },
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta { output_index: usize, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    ArgumentsDone {
        output_index: usize,
        #[serde(default)]
        arguments: Option<String>,
    },
    #[serde(rename = "response.output_text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.completed")]
    Completed { response: WireResponse },
    #[serde(rename = "response.failed")]
    Failed { response: WireResponse },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: WireResponse },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireItem {
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(default)]
        id: Option<String>,
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct WireResponse {
    #[serde(default)]
    output: Vec<WireOutput>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    incomplete_details: Option<WireIncomplete>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[derive(Deserialize)]
struct WireIncomplete {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireOutput {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<WireContent>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireContent {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Other,
}

impl WireResponse {
    /// Concatenated text of all message outputs
    fn output_text(&self) -> String {
        let mut text = String::new();
        for output in &self.output {
            if let WireOutput::Message { content } = output {
                for part in content {
                    if let WireContent::OutputText { text: part } = part {
                        text.push_str(part);
                    }
                }
            }
        }
        text
    }
}

const HANDLED_EVENTS: &[&str] = &[
    "response.output_item.added",
    "response.function_call_arguments.delta",
    "response.function_call_arguments.done",
    "response.output_text.delta",
    "response.completed",
    "response.failed",
    "response.incomplete",
    "error",
];

/// Decode the JSON payload of one SSE frame
pub fn decode_event(data: &str) -> Result<StreamEvent, BackendError> {
    let value: Value = serde_json::from_str(data).map_err(|e| BackendError::Decode(format!("{}: {}", e, data)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::Decode(format!("event without type: {}", data)))?
        .to_string();

    if !HANDLED_EVENTS.contains(&kind.as_str()) {
        return Ok(StreamEvent::Ignored { kind });
    }

    let event: WireEvent =
        serde_json::from_value(value).map_err(|e| BackendError::Decode(format!("{}: {}", kind, e)))?;

    let event = match event {
        WireEvent::OutputItemAdded { output_index, item } => StreamEvent::ItemAdded {
            output_index,
            item: match item {
                WireItem::FunctionCall { id, call_id, name, arguments, status } => {
                    OutputItem::FunctionCall { id, call_id, name, arguments, status }
                }
                WireItem::Other => OutputItem::Other,
            },
        },
        WireEvent::ArgumentsDelta { output_index, delta } => StreamEvent::ArgumentsDelta { output_index, delta },
        WireEvent::ArgumentsDone { output_index, arguments } => StreamEvent::ArgumentsDone { output_index, arguments },
        WireEvent::TextDelta { delta } => StreamEvent::TextDelta { delta },
        WireEvent::Completed { response } => StreamEvent::Completed {
            output_text: response.output_text(),
        },
        WireEvent::Failed { response } => StreamEvent::Failed {
            message: response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "response failed".to_string()),
        },
        WireEvent::Incomplete { response } => StreamEvent::Failed {
            message: format!(
                "response incomplete: {}",
                response
                    .incomplete_details
                    .and_then(|d| d.reason)
                    .unwrap_or_else(|| "unknown reason".to_string())
            ),
        },
        WireEvent::Error { message, code } => StreamEvent::Failed {
            message: match (code, message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => "stream error".to_string(),
            },
        },
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_function_call_item() {
        let event = decode_event(
            r#"{"type":"response.output_item.added","output_index":1,"sequence_number":3,
                "item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"get_date","arguments":"","status":"in_progress"}}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            StreamEvent::ItemAdded {
                output_index: 1,
                item: OutputItem::FunctionCall {
                    id: Some("fc_1".to_string()),
                    call_id: "call_1".to_string(),
                    name: "get_date".to_string(),
                    arguments: String::new(),
                    status: Some("in_progress".to_string()),
                },
            }
        );
    }

    #[test]
    fn test_decode_message_item_is_other() {
        let event = decode_event(
            r#"{"type":"response.output_item.added","output_index":0,
                "item":{"type":"message","id":"msg_1","role":"assistant","content":[]}}"#,
        )
        .unwrap();
        assert_eq!(event, StreamEvent::ItemAdded { output_index: 0, item: OutputItem::Other });
    }

    #[test]
    fn test_decode_argument_events() {
        assert_eq!(
            decode_event(r#"{"type":"response.function_call_arguments.delta","output_index":0,"item_id":"fc_1","delta":"{\"tz"}"#)
                .unwrap(),
            StreamEvent::ArgumentsDelta { output_index: 0, delta: "{\"tz".to_string() }
        );
        assert_eq!(
            decode_event(r#"{"type":"response.function_call_arguments.done","output_index":0,"arguments":"{}"}"#).unwrap(),
            StreamEvent::ArgumentsDone { output_index: 0, arguments: Some("{}".to_string()) }
        );
    }

    #[test]
    fn test_decode_completed_aggregates_output_text() {
        let data = json!({
            "type": "response.completed",
            "response": {
                "id": "resp_1",
                "output": [
                    {"type": "function_call", "call_id": "c", "name": "get_date", "arguments": "{}"},
                    {"type": "message", "content": [
                        {"type": "output_text", "text": "It is "},
                        {"type": "refusal", "refusal": "no"},
                        {"type": "output_text", "text": "noon."}
                    ]}
                ]
            }
        });

        assert_eq!(
            decode_event(&data.to_string()).unwrap(),
            StreamEvent::Completed { output_text: "It is noon.".to_string() }
        );
    }

    #[test]
    fn test_decode_failures() {
        let failed = json!({"type": "response.failed", "response": {"output": [], "error": {"code": "server_error", "message": "boom"}}});
        assert_eq!(
            decode_event(&failed.to_string()).unwrap(),
            StreamEvent::Failed { message: "boom".to_string() }
        );

        let error = json!({"type": "error", "code": "rate_limit_exceeded", "message": "slow down"});
        assert_eq!(
            decode_event(&error.to_string()).unwrap(),
            StreamEvent::Failed { message: "rate_limit_exceeded: slow down".to_string() }
        );
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        assert_eq!(
            decode_event(r#"{"type":"response.created","response":{}}"#).unwrap(),
            StreamEvent::Ignored { kind: "response.created".to_string() }
        );
    }

    #[test]
    fn test_malformed_frames_are_decode_errors() {
        assert!(matches!(decode_event("not json"), Err(BackendError::Decode(_))));
        assert!(matches!(decode_event(r#"{"no":"type"}"#), Err(BackendError::Decode(_))));
        assert!(matches!(
            decode_event(r#"{"type":"response.function_call_arguments.delta","delta":"x"}"#),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let client = ResponsesClient::new("https://example.test/v1/", "key", "gpt-4.1");
        assert_eq!(client.base_url, "https://example.test/v1");

        let request = ResponseRequest {
            input: vec![Turn::user("hi")],
            instructions: Some("Be brief.".to_string()),
            tools: vec![FunctionTool::from(ToolDefinition {
                name: "get_date".to_string(),
                description: "date".to_string(),
                parameters: json!({"type": "object"}),
            })],
            tool_choice: Some(ToolChoice::None),
        };

        let body = serde_json::to_value(client.body(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4.1",
                "input": [{"role": "user", "content": "hi"}],
                "instructions": "Be brief.",
                "tools": [{
                    "type": "function",
                    "name": "get_date",
                    "description": "date",
                    "strict": true,
                    "parameters": {"type": "object"}
                }],
                "tool_choice": "none",
                "stream": true
            })
        );

        let plain = ResponseRequest { input: vec![], ..Default::default() };
        let body = serde_json::to_value(client.body(&plain)).unwrap();
        assert!(body.get("instructions").is_none());
        assert!(body.get("tool_choice").is_none());
    }
}
