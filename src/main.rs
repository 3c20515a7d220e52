use anyhow::{Context, Result};
use clap::Parser;
use rig::client::EmbeddingsClient;
use rig::providers::openai;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

mod agent_loop;
mod colors;
mod config;
mod error;
mod history;
mod persona;
mod responses;
mod retrieval;
mod session;
mod stream;
mod terminal;
mod tools;
mod vecdb;

use agent_loop::AgentLoop;
use config::ChatConfig;
use history::HistoryStore;
use persona::PersonaBook;
use responses::ResponsesClient;
use retrieval::Augmenter;
use session::SessionEnd;

/// chatbot - A terminal chatbot with tool calls and retrieval context
#[derive(Parser, Debug)]
#[command(name = "chatbot")]
#[command(about = "A terminal chatbot with tool calls and retrieval context")]
struct Args {
    /// Persona of the chatbot (see --list-personas)
    #[arg(long, short = 'p')]
    persona: Option<String>,

    /// List the available personas
    #[arg(long)]
    list_personas: bool,

    /// Clear the stored conversation history before starting
    #[arg(long)]
    reset_history: bool,

    /// Model to use
    #[arg(long, short = 'm', default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Markdown or text file (or a directory of them) to use as retrieval context
    #[arg(long, short = 'k')]
    knowledge: Option<PathBuf>,

    /// Maximum tool-call round trips per message
    #[arg(long, default_value_t = agent_loop::DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    /// History file (default: <data dir>/chatbot/history.json)
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let personas = PersonaBook::bundled()?;

    // Handle --list-personas
    if args.list_personas {
        println!("\nAvailable personas:\n");
        for name in personas.names() {
            println!("  {}", name);
        }
        return Ok(());
    }

    let instructions = match args.persona {
        Some(ref name) => Some(personas.prompt(name)?.to_string()),
        None => None,
    };

    let mut config = ChatConfig::from_env()?;
    config.model = args.model.clone();
    config.max_iterations = args.max_iterations;

    let store = match args.history_file {
        Some(ref path) => HistoryStore::new(path, config.max_turns),
        None => HistoryStore::in_data_dir(config.max_turns)?,
    };

    let mut history = store.load();
    if args.reset_history {
        store.reset(&mut history)?;
        terminal::print_success("History reset");
    } else if !history.is_empty() {
        terminal::print_history_count(history.len());
    }

    let registry = tools::builtin_registry(&config.python, config.code_timeout);
    tracing::debug!(tools = ?registry.names(), "Registered tools");
    let backend = ResponsesClient::new(&config.base_url, &config.api_key, &config.model);

    let mut agent = AgentLoop::new(backend, registry);
    agent.set_max_iterations(config.max_iterations);
    if let Some(instructions) = instructions {
        agent.set_instructions(instructions);
    }

    // Build the knowledge index if requested
    if let Some(ref path) = args.knowledge {
        let documents = vecdb::load_documents(path)
            .with_context(|| format!("Failed to read knowledge from {}", path.display()))?;
        terminal::print_info(&format!("Indexing {} knowledge files...", documents.len()));

        let client = openai::Client::builder(&config.api_key)
            .base_url(&config.base_url)
            .build();
        let embedder = client.embedding_model(&config.embedding_model);

        let index = vecdb::KnowledgeIndex::build(
            embedder,
            &documents,
            &store.path().with_file_name("knowledge.db"),
        )
        .await?;
        terminal::print_success(&format!("Indexed {} knowledge chunks", index.len()));

        agent.set_augmenter(
            Augmenter::new(Arc::new(index))
                .with_top_k(config.top_k)
                .with_threshold(config.similarity_threshold),
        );
    }

    // Ctrl-C ends the session from anywhere, including mid-turn
    let cancel_token = CancellationToken::new();
    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => cancel_token.cancel(),
                Err(err) => {
                    eprintln!("[WARN] Unable to listen for Ctrl-C signal: {}", err);
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let end = session::run(&mut agent, &mut history, &store, &mut lines, &cancel_token).await?;

    if end == SessionEnd::Interrupted {
        // A pending stdin read would otherwise keep the runtime alive
        std::process::exit(0);
    }

    Ok(())
}
