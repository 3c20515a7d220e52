use crate::agent_loop::{AgentLoop, TurnOutcome};
use crate::history::{History, HistoryStore};
use crate::responses::CompletionBackend;
use crate::terminal;
use anyhow::Result;
use tokio::io::{AsyncBufRead, Lines};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why the read-eval loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The input closed
    EndOfInput,
    /// The cancellation token fired, possibly mid-turn
    Interrupted,
}

/// Read lines and run one turn per non-empty line until the input closes or
/// `cancel_token` fires. History is flushed before returning either way.
///
/// Cancellation drops the in-flight turn. Turns it already appended stay, and
/// a half-streamed tool call never reaches the history.
pub async fn run<B, R>(
    agent: &mut AgentLoop<B>,
    history: &mut History,
    store: &HistoryStore,
    lines: &mut Lines<R>,
    cancel_token: &CancellationToken,
) -> Result<SessionEnd>
where
    B: CompletionBackend,
    R: AsyncBufRead + Unpin,
{
    let end = loop {
        terminal::print_user_prompt();

        let line = tokio::select! {
            _ = cancel_token.cancelled() => break SessionEnd::Interrupted,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break SessionEnd::EndOfInput,
            Err(e) => {
                flush(store, history);
                return Err(e.into());
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        terminal::print_assistant_prompt();

        let outcome = tokio::select! {
            _ = cancel_token.cancelled() => None,
            outcome = agent.chat(input, history) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            debug!(
                state = ?agent.state(),
                iterations = agent.iteration_count(),
                "Turn interrupted"
            );
            break SessionEnd::Interrupted;
        };

        match outcome {
            Ok(TurnOutcome::Answered { iterations }) => {
                debug!(iterations, "Turn answered");
            }
            Ok(TurnOutcome::ForcedFinal { iterations }) => {
                terminal::print_warning(&format!(
                    "Stopped calling tools after {} rounds",
                    iterations
                ));
            }
            Ok(TurnOutcome::HistoryReset { error }) => {
                terminal::print_error(&format!("Request failed: {}", error));
                terminal::print_warning("Conversation history has been reset");
            }
            Err(e) => {
                terminal::print_error(&format!("Turn aborted: {}", e));
            }
        }
    };

    println!();
    flush(store, history);
    Ok(end)
}

fn flush(store: &HistoryStore, history: &History) {
    match store.flush(history) {
        Ok(()) => terminal::print_success("History flushed!"),
        Err(e) => terminal::print_error(&format!("Failed to flush history: {}", e)),
    }
}
