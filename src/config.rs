use crate::agent_loop::DEFAULT_MAX_ITERATIONS;
use crate::history::MAX_TURNS;
use crate::responses::DEFAULT_BASE_URL;
use crate::retrieval::{DEFAULT_TOP_K, SIMILARITY_THRESHOLD};
use anyhow::{anyhow, Result};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const API_KEY_VAR: &str = "OPENAI_API_KEY";
const BASE_URL_VAR: &str = "OPENAI_BASE_URL";

/// Runtime settings for a chat session
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub embedding_model: String,
    pub base_url: String,
    pub api_key: String,
    /// Tool-call round trips allowed per user turn
    pub max_iterations: usize,
    /// Turns kept when the history is persisted
    pub max_turns: usize,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub python: String,
    pub code_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_turns: MAX_TURNS,
            similarity_threshold: SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            python: "python3".to_string(),
            code_timeout: Duration::from_secs(2),
        }
    }
}

impl ChatConfig {
    /// Defaults plus the API key and base URL from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: api_key_from(std::env::var(API_KEY_VAR).ok())?,
            base_url: base_url_from(std::env::var(BASE_URL_VAR).ok()),
            ..Self::default()
        })
    }
}

fn api_key_from(value: Option<String>) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("{} is not set", API_KEY_VAR))
}

fn base_url_from(value: Option<String>) -> String {
    value
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}
