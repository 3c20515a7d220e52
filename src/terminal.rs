use crate::colors;
use colored::Colorize;
use std::io::{self, Write};
use tokio::sync::mpsc::Sender;

/// Something a turn wants shown to the user.
///
/// With no event sender attached the events are rendered straight to the
/// terminal; otherwise they are forwarded (used by tests to observe a turn).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    AssistantChunk(String),
    /// End of the assistant text of one response
    AssistantDone,
    ToolCallStarted { name: String },
    ToolArgumentsChunk(String),
    ToolArgumentsDone,
    ToolRunning { name: String },
    ToolFinished { name: String, observation: String, failed: bool },
    Warning(String),
}

/// Where a turn sends its output
#[derive(Debug, Clone, Default)]
pub struct ChatOutput {
    tx: Option<Sender<ChatEvent>>,
}

impl ChatOutput {
    /// Render directly to stdout
    pub fn terminal() -> Self {
        Self { tx: None }
    }

    /// Forward events to a channel instead of printing
    pub fn channel(tx: Sender<ChatEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn emit(&self, event: ChatEvent) {
        match self.tx {
            Some(ref tx) => {
                let _ = tx.try_send(event);
            }
            None => render(event),
        }
    }

    /// Announce a tool run; returns a spinner when rendering to the terminal
    pub fn start_tool(&self, name: &str) -> Option<indicatif::ProgressBar> {
        match self.tx {
            Some(_) => {
                self.emit(ChatEvent::ToolRunning { name: name.to_string() });
                None
            }
            None => Some(create_tool_spinner(name)),
        }
    }

    pub fn finish_tool(
        &self,
        spinner: Option<indicatif::ProgressBar>,
        name: &str,
        observation: &str,
        failed: bool,
    ) {
        if let Some(spinner) = spinner {
            let message = format!("{} -> {}", name, truncate_for_display(observation.trim_end(), 200));
            if failed {
                finish_spinner_error(&spinner, &message);
            } else {
                finish_spinner_success(&spinner, &message);
            }
            return;
        }

        self.emit(ChatEvent::ToolFinished {
            name: name.to_string(),
            observation: observation.to_string(),
            failed,
        });
    }
}

fn render(event: ChatEvent) {
    match event {
        ChatEvent::AssistantChunk(chunk) => print_streaming_token(&chunk),
        ChatEvent::AssistantDone => end_streaming(),
        ChatEvent::ToolCallStarted { name } => print_tool_invocation(&name),
        ChatEvent::ToolArgumentsChunk(chunk) => print_tool_arguments(&chunk),
        ChatEvent::ToolArgumentsDone => {
            println!("{}", "...".truecolor(colors::OVERLAY0.0, colors::OVERLAY0.1, colors::OVERLAY0.2));
        }
        ChatEvent::ToolRunning { .. } | ChatEvent::ToolFinished { .. } => {}
        ChatEvent::Warning(message) => print_warning(&message),
    }
}

fn truncate_for_display(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// Print a user prompt
pub fn print_user_prompt() {
    print!("{} ", "You:".truecolor(colors::GREEN.0, colors::GREEN.1, colors::GREEN.2).bold());
    io::stdout().flush().ok();
}

/// Print the assistant name
pub fn print_assistant_prompt() {
    print!("{} ", "ChatGPT:".truecolor(colors::BLUE.0, colors::BLUE.1, colors::BLUE.2).bold());
    io::stdout().flush().ok();
}

/// Print the header shown while a tool call's arguments stream in
pub fn print_tool_invocation(tool_name: &str) {
    print!("\n{} {} {} ",
           "Invoking function".truecolor(colors::MAUVE.0, colors::MAUVE.1, colors::MAUVE.2),
           tool_name.truecolor(colors::MAUVE.0, colors::MAUVE.1, colors::MAUVE.2).bold(),
           "with arguments:".truecolor(colors::MAUVE.0, colors::MAUVE.1, colors::MAUVE.2));
    io::stdout().flush().ok();
}

/// Print a fragment of streamed tool arguments
pub fn print_tool_arguments(chunk: &str) {
    print!("{}", chunk.truecolor(colors::OVERLAY1.0, colors::OVERLAY1.1, colors::OVERLAY1.2));
    io::stdout().flush().ok();
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}",
             "ℹ️".truecolor(colors::SAPPHIRE.0, colors::SAPPHIRE.1, colors::SAPPHIRE.2),
             message.truecolor(colors::SAPPHIRE.0, colors::SAPPHIRE.1, colors::SAPPHIRE.2));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}",
             "✓".truecolor(colors::GREEN.0, colors::GREEN.1, colors::GREEN.2),
             message.truecolor(colors::GREEN.0, colors::GREEN.1, colors::GREEN.2));
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}",
             "⚠️".truecolor(colors::YELLOW.0, colors::YELLOW.1, colors::YELLOW.2),
             message.truecolor(colors::YELLOW.0, colors::YELLOW.1, colors::YELLOW.2));
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}",
              "✗".truecolor(colors::RED.0, colors::RED.1, colors::RED.2),
              message.truecolor(colors::RED.0, colors::RED.1, colors::RED.2));
}

/// Print history count
pub fn print_history_count(count: usize) {
    println!(
        "{}",
        format!("[History: {} turns]", count)
            .truecolor(colors::OVERLAY0.0, colors::OVERLAY0.1, colors::OVERLAY0.2)
    );
}

/// Format a streaming token for display
pub fn print_streaming_token(token: &str) {
    print!("{}", token);
    io::stdout().flush().ok();
}

/// End streaming output
pub fn end_streaming() {
    println!();
}

/// Create a spinner for tool execution
pub fn create_tool_spinner(tool_name: &str) -> indicatif::ProgressBar {
    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_style(
        indicatif::ProgressStyle::default_spinner()
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷")
            .template("{spinner:.magenta} {msg}")
            .unwrap(),
    );
    spinner.set_message(format!("Running {}...", tool_name));
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Finish a spinner with success
pub fn finish_spinner_success(spinner: &indicatif::ProgressBar, message: &str) {
    let formatted = format!("{} {}",
                            "✓".truecolor(colors::GREEN.0, colors::GREEN.1, colors::GREEN.2),
                            message.truecolor(colors::GREEN.0, colors::GREEN.1, colors::GREEN.2));
    spinner.finish_with_message(formatted);
}

/// Finish a spinner with error
pub fn finish_spinner_error(spinner: &indicatif::ProgressBar, message: &str) {
    let formatted = format!("{} {}",
                            "✗".truecolor(colors::RED.0, colors::RED.1, colors::RED.2),
                            message.truecolor(colors::RED.0, colors::RED.1, colors::RED.2));
    spinner.finish_with_message(formatted);
}

/// Create a progress bar for embedding generation
pub fn create_embedding_progress(total: u64) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(total);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.yellow} [{elapsed_precise}] [{bar:40.yellow/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▓▒░  "),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
