//! Reassembly of a streamed model response.
//!
//! The backend delivers a response as a sequence of small events. Tool calls
//! arrive in pieces: an `item_added` event announcing the call at an output
//! position, any number of argument deltas for that position, then a `done`
//! event. [`StreamReassembler`] keeps the partial calls keyed by position and
//! hands back each call once its arguments are complete.

use crate::error::TurnError;
use crate::history::{History, Turn};
use crate::terminal::{ChatEvent, ChatOutput};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{trace, warn};

/// An output item announced by `item_added`
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    FunctionCall {
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
        status: Option<String>,
    },
    /// Messages, reasoning and anything else without tool-call semantics
    Other,
}

/// Typed events of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ItemAdded { output_index: usize, item: OutputItem },
    ArgumentsDelta { output_index: usize, delta: String },
    ArgumentsDone { output_index: usize, arguments: Option<String> },
    TextDelta { delta: String },
    Completed { output_text: String },
    Failed { message: String },
    Ignored { kind: String },
}

#[derive(Debug)]
struct PendingToolCall {
    call_id: String,
    name: String,
    arguments: String,
    id: Option<String>,
    status: Option<String>,
}

/// A tool call whose arguments have been fully received
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub id: Option<String>,
    pub status: Option<String>,
    /// Arguments parsed as JSON, or the parse error message
    pub decoded: Result<Value, String>,
}

impl ReadyToolCall {
    /// The `function_call` turn recording this call
    pub fn function_call_turn(&self) -> Turn {
        Turn::function_call(
            self.call_id.clone(),
            self.name.clone(),
            self.arguments.clone(),
            self.id.clone(),
            self.status.clone(),
        )
    }
}

/// Per-response reassembly state. Create a fresh one for every backend response.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    pending: HashMap<usize, PendingToolCall>,
    streamed_text: bool,
    completed: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any assistant text was echoed for this response
    pub fn streamed_text(&self) -> bool {
        self.streamed_text
    }

    /// Check made once the event stream ends. A response that never
    /// completed records no assistant turn and its pending calls are lost.
    pub fn finish(&self) -> Result<(), TurnError> {
        if self.completed {
            return Ok(());
        }
        let pending = self.pending_calls();
        warn!(pending, "Response stream ended before completion");
        Err(TurnError::Truncated { pending })
    }

    /// Number of calls still waiting for their arguments
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Apply one event.
    ///
    /// Returns a [`ReadyToolCall`] when the event completes a call's arguments.
    /// The only history mutation here is the assistant turn on `Completed`.
    pub fn apply(
        &mut self,
        event: StreamEvent,
        history: &mut History,
        output: &ChatOutput,
    ) -> Result<Option<ReadyToolCall>, TurnError> {
        match event {
            StreamEvent::ItemAdded { output_index, item } => {
                if let OutputItem::FunctionCall { id, call_id, name, arguments, status } = item {
                    output.emit(ChatEvent::ToolCallStarted { name: name.clone() });
                    let previous = self.pending.insert(
                        output_index,
                        PendingToolCall { call_id, name, arguments, id, status },
                    );
                    if previous.is_some() {
                        warn!(output_index, "Replacing an unfinished tool call at the same position");
                    }
                }
                Ok(None)
            }

            StreamEvent::ArgumentsDelta { output_index, delta } => {
                let pending = self
                    .pending
                    .get_mut(&output_index)
                    .ok_or_else(|| TurnError::protocol(output_index, "arguments delta"))?;
                pending.arguments.push_str(&delta);
                output.emit(ChatEvent::ToolArgumentsChunk(delta));
                Ok(None)
            }

            StreamEvent::ArgumentsDone { output_index, arguments } => {
                let mut pending = self
                    .pending
                    .remove(&output_index)
                    .ok_or_else(|| TurnError::protocol(output_index, "arguments done"))?;

                if let Some(full) = arguments {
                    if pending.arguments.is_empty() {
                        output.emit(ChatEvent::ToolArgumentsChunk(full.clone()));
                        pending.arguments = full;
                    } else if pending.arguments != full {
                        warn!(
                            output_index,
                            "Final arguments differ from the streamed deltas, keeping the deltas"
                        );
                    }
                }
                output.emit(ChatEvent::ToolArgumentsDone);

                let decoded = serde_json::from_str(&pending.arguments).map_err(|e| e.to_string());
                Ok(Some(ReadyToolCall {
                    call_id: pending.call_id,
                    name: pending.name,
                    arguments: pending.arguments,
                    id: pending.id,
                    status: pending.status,
                    decoded,
                }))
            }

            StreamEvent::TextDelta { delta } => {
                if !delta.is_empty() {
                    self.streamed_text = true;
                    output.emit(ChatEvent::AssistantChunk(delta));
                }
                Ok(None)
            }

            StreamEvent::Completed { output_text } => {
                self.completed = true;
                if !self.pending.is_empty() {
                    warn!(pending = self.pending.len(), "Response completed with unfinished tool calls");
                }
                if !output_text.is_empty() {
                    history.push(Turn::assistant(output_text));
                }
                Ok(None)
            }

            StreamEvent::Failed { message } => Err(TurnError::ResponseFailed(message)),

            StreamEvent::Ignored { kind } => {
                trace!(kind = %kind, "Ignoring stream event");
                Ok(None)
            }
        }
    }
}
