use crate::error::{BackendError, ToolError, TurnError};
use crate::history::{History, Turn};
use crate::responses::{CompletionBackend, EventStream, FunctionTool, ResponseRequest, ToolChoice};
use crate::retrieval::Augmenter;
use crate::stream::{ReadyToolCall, StreamReassembler};
use crate::terminal::{ChatEvent, ChatOutput};
use crate::tools::{Observation, ToolRegistry};
use futures::StreamExt;
use tracing::{debug, warn};

/// Default number of tool-call round trips per user turn
pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// System turn appended before the final request once the cap is reached
pub const FORCE_FINAL_DIRECTIVE: &str = "You have reached the maximum number of tool calls for this question. \
Do not call any more tools. Answer the user's question now with the information you already have.";

/// Where the controller is within a user turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingUserInput,
    Augmenting,
    Requesting,
    Streaming,
    ToolDispatch,
    Completed,
    Aborted,
}

/// How a user turn ended
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model answered without hitting the iteration cap
    Answered { iterations: usize },
    /// The cap was reached and a final answer was forced
    ForcedFinal { iterations: usize },
    /// The first request of the turn failed and the history was discarded
    HistoryReset { error: BackendError },
}

/// Drives one user turn: augment, request, reassemble, dispatch, repeat
pub struct AgentLoop<B: CompletionBackend> {
    backend: B,
    registry: ToolRegistry,
    augmenter: Option<Augmenter>,
    /// Persona instructions sent with every request
    instructions: Option<String>,
    /// Optional event sink (None = render to the terminal)
    output: ChatOutput,
    state: TurnState,
    /// Tool-call round trips used in the current turn
    iteration_count: usize,
    max_iterations: usize,
}

impl<B: CompletionBackend> AgentLoop<B> {
    pub fn new(backend: B, registry: ToolRegistry) -> Self {
        Self {
            backend,
            registry,
            augmenter: None,
            instructions: None,
            output: ChatOutput::terminal(),
            state: TurnState::AwaitingUserInput,
            iteration_count: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn set_augmenter(&mut self, augmenter: Augmenter) {
        self.augmenter = Some(augmenter);
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.instructions = Some(instructions.into());
    }

    pub fn set_output(&mut self, output: ChatOutput) {
        self.output = output;
    }

    /// Set the maximum tool-call round trips per user turn
    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Tool-call round trips used by the most recent turn
    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    /// Run one user turn against `history`.
    ///
    /// Errors abort the turn only. Turns appended before the failure stay in
    /// the history, and every `function_call` there has its output.
    pub async fn chat(&mut self, user_input: &str, history: &mut History) -> Result<TurnOutcome, TurnError> {
        self.iteration_count = 0;

        self.state = TurnState::Augmenting;
        if let Some(ref augmenter) = self.augmenter {
            let added = augmenter.augment(user_input, history).await;
            debug!(added, "Retrieval context");
        }
        history.push(Turn::user(user_input));

        let tools: Vec<FunctionTool> = self
            .registry
            .declarations()
            .await
            .into_iter()
            .map(FunctionTool::from)
            .collect();

        let mut first_request = true;

        loop {
            let forced = self.iteration_count >= self.max_iterations;
            if forced {
                debug!(iterations = self.iteration_count, "Iteration cap reached, forcing a final answer");
                history.push(Turn::system(FORCE_FINAL_DIRECTIVE));
            }

            let request = ResponseRequest {
                input: history.turns().to_vec(),
                instructions: self.instructions.clone(),
                tools: tools.clone(),
                tool_choice: Some(if forced { ToolChoice::None } else { ToolChoice::Auto }),
            };

            self.state = TurnState::Requesting;
            let stream = match self.backend.stream(&request).await {
                Ok(stream) => stream,
                Err(error) if first_request => {
                    warn!(error = %error, "First request failed, discarding history");
                    history.clear();
                    self.state = TurnState::Aborted;
                    return Ok(TurnOutcome::HistoryReset { error });
                }
                Err(error) => return Err(self.abort(error.into())),
            };
            first_request = false;

            self.state = TurnState::Streaming;
            let dispatched = match self.consume(stream, history, forced).await {
                Ok(dispatched) => dispatched,
                Err(error) => return Err(self.abort(error)),
            };

            if forced {
                self.state = TurnState::Completed;
                return Ok(TurnOutcome::ForcedFinal {
                    iterations: self.iteration_count,
                });
            }

            if dispatched == 0 {
                self.state = TurnState::Completed;
                return Ok(TurnOutcome::Answered {
                    iterations: self.iteration_count,
                });
            }

            self.iteration_count += 1;
        }
    }

    fn abort(&mut self, error: TurnError) -> TurnError {
        warn!(error = %error, "Turn aborted");
        self.state = TurnState::Aborted;
        error
    }

    /// Consume one response, dispatching each tool call as it completes.
    /// Returns the number of calls dispatched.
    async fn consume(&mut self, mut stream: EventStream, history: &mut History, forced: bool) -> Result<usize, TurnError> {
        let mut reassembler = StreamReassembler::new();
        let mut dispatched = 0;

        while let Some(event) = stream.next().await {
            let Some(call) = reassembler.apply(event?, history, &self.output)? else {
                continue;
            };

            if forced {
                warn!(tool = %call.name, "Ignoring tool call after the iteration cap");
                self.output.emit(ChatEvent::Warning(format!(
                    "Ignoring call to {}: tool call limit reached",
                    call.name
                )));
                continue;
            }

            self.state = TurnState::ToolDispatch;
            let observation = self.dispatch(&call).await?;
            history.push(call.function_call_turn());
            history.push(Turn::function_call_output(call.call_id.clone(), observation.text));
            dispatched += 1;
            self.state = TurnState::Streaming;
        }

        if reassembler.streamed_text() {
            self.output.emit(ChatEvent::AssistantDone);
        }
        reassembler.finish()?;

        Ok(dispatched)
    }

    async fn dispatch(&self, call: &ReadyToolCall) -> Result<Observation, TurnError> {
        self.registry.get(&call.name)?;

        let spinner = self.output.start_tool(&call.name);
        let observation = match call.decoded {
            Ok(ref args) => self.registry.dispatch(&call.name, args.clone()).await?,
            Err(ref reason) => Observation::error(&ToolError::invalid_arguments(format!(
                "arguments are not valid JSON: {}",
                reason
            ))),
        };
        self.output
            .finish_tool(spinner, &call.name, &observation.text, observation.failed);

        Ok(observation)
    }
}
