use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum number of turns kept in the history file
pub const MAX_TURNS: usize = 20;

const HISTORY_FILE: &str = "history.json";

/// Who authored a message turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCallTag {
    #[serde(rename = "function_call")]
    FunctionCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCallOutputTag {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput,
}

/// A plain chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A tool invocation issued by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(rename = "type")]
    pub kind: FunctionCallTag,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// The observation produced for a [`FunctionCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutput {
    #[serde(rename = "type")]
    pub kind: FunctionCallOutputTag,
    pub call_id: String,
    pub output: String,
}

/// One entry in the conversation, serialized in the shape the Responses API
/// accepts as `input` items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Turn {
    FunctionCall(FunctionCall),
    FunctionCallOutput(FunctionCallOutput),
    Message(Message),
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::message(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::message(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::message(Role::System, content)
    }

    fn message(role: Role, content: impl Into<String>) -> Self {
        Self::Message(Message {
            role,
            content: content.into(),
        })
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
        id: Option<String>,
        status: Option<String>,
    ) -> Self {
        Self::FunctionCall(FunctionCall {
            kind: FunctionCallTag::FunctionCall,
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            id,
            status,
        })
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput(FunctionCallOutput {
            kind: FunctionCallOutputTag::FunctionCallOutput,
            call_id: call_id.into(),
            output: output.into(),
        })
    }

    /// Role of a message turn, `None` for tool items
    pub fn role(&self) -> Option<Role> {
        match self {
            Turn::Message(message) => Some(message.role),
            _ => None,
        }
    }
}

/// The in-memory conversation. Unbounded during a session; only
/// [`HistoryStore::flush`] truncates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// The most recent `max` turns, in their original order
    pub fn tail(&self, max: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(max);
        &self.turns[start..]
    }
}

/// Persistence for [`History`] as a JSON array of turns
pub struct HistoryStore {
    path: PathBuf,
    max_turns: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_turns: usize) -> Self {
        Self {
            path: path.into(),
            max_turns,
        }
    }

    /// Store rooted in the user data directory (`<data dir>/chatbot/history.json`)
    pub fn in_data_dir(max_turns: usize) -> Result<Self> {
        Ok(Self::new(Self::default_path()?, max_turns))
    }

    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("chatbot").join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted history. A missing file yields an empty history,
    /// and so does a corrupt one (with a warning).
    pub fn load(&self) -> History {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history file, starting from scratch");
                return History::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read history, starting from scratch");
                return History::new();
            }
        };

        match serde_json::from_str::<Vec<Turn>>(&content) {
            Ok(turns) => History::from_turns(turns),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load history, starting from scratch");
                History::new()
            }
        }
    }

    /// Persist the most recent `max_turns` turns
    pub fn flush(&self, history: &History) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string(history.tail(self.max_turns))?;
        fs::write(&self.path, content)?;

        debug!(path = %self.path.display(), turns = history.len().min(self.max_turns), "History flushed");
        Ok(())
    }

    /// Clear both the in-memory and the persisted history
    pub fn reset(&self, history: &mut History) -> Result<()> {
        history.clear();

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
