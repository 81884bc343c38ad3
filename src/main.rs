use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use mcp_chat_client::agent_core::{
    AgentError, ConversationHistory, DispatchLoop, TurnEvent,
};
use mcp_chat_client::config::{self, DEFAULT_SERVER_CONFIG_PATH, SYSTEM_PROMPT};
use mcp_chat_client::inference::{ChatModel, InferenceClient, ModelConfig};
use mcp_chat_client::mcp_client::SessionRegistry;

/// Chat with a model that can call tools on MCP servers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server configuration document (JSON, or YAML by extension)
    #[arg(short, long, default_value = DEFAULT_SERVER_CONFIG_PATH)]
    config: PathBuf,

    /// Model id; overrides CLIENT_MODEL
    #[arg(short, long)]
    model: Option<String>,

    /// Write logs to stderr instead of the log file
    #[arg(long, default_value_t = false)]
    log_stderr: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    if let Some(path) = mcp_chat_client::init_tracing(args.log_stderr, args.log_json)
        .context("failed to initialize logging")?
    {
        eprintln!("Logging to {}", path.display());
    }

    let mut model_config = ModelConfig::from_env().context("invalid model settings")?;
    if let Some(model) = args.model {
        model_config = model_config.with_model(model);
    }
    let model = InferenceClient::from_config(model_config).context("failed to build model client")?;

    let server_config = config::load_server_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let mut registry = SessionRegistry::new();
    for (identity, spec) in server_config.transport_specs() {
        match registry.connect(&identity, &spec).await {
            Ok(record) => {
                let tools: Vec<&str> = record.tools.iter().map(String::as_str).collect();
                println!(
                    "Connected to server {identity} ({spec}) with tools: {}",
                    tools.join(", ")
                );
            }
            Err(e) => {
                eprintln!("Failed to connect to {identity} ({spec}): {e}");
            }
        }
    }
    println!("{}", registry.cached_catalog().capability_summary());

    let (tx, events) = mpsc::unbounded_channel();
    let dispatch = DispatchLoop::new(model).with_events(tx);

    let outcome = chat_loop(&dispatch, &mut registry, events).await;

    for (identity, e) in registry.close_all().await {
        eprintln!("Failed to close {identity}: {e}");
    }
    outcome
}

/// Read user input until a stop word or end of input, running one turn per
/// line. Turn events are printed as they arrive.
async fn chat_loop<M: ChatModel>(
    dispatch: &DispatchLoop<M>,
    registry: &mut SessionRegistry,
    mut events: UnboundedReceiver<TurnEvent>,
) -> anyhow::Result<()> {
    let mut history = ConversationHistory::with_system_prompt(SYSTEM_PROMPT);

    println!("Welcome to the CLI chat bot. You can type stop to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("User: ");
        std::io::stdout().flush().context("failed to write prompt")?;

        let Some(line) = lines.next_line().await.context("failed to read input")? else {
            break;
        };
        let input = line.trim();
        if config::is_stop_word(input) {
            println!("Exiting chat...");
            break;
        }
        if input.is_empty() {
            continue;
        }

        let outcome = {
            let turn = dispatch.run_turn(registry, &history, input);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    Some(event) = events.recv() => print_event(&event),
                    outcome = &mut turn => break outcome,
                }
            }
        };
        while let Ok(event) = events.try_recv() {
            print_event(&event);
        }

        match outcome {
            Ok(next) => {
                history = next;
                let reply = history.last().map(|m| m.content()).unwrap_or_default();
                println!("{} Assistant {}", "-".repeat(10), "-".repeat(10));
                println!("{reply}");
                println!("{}", "-".repeat(30));
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn failed");
                eprintln!("Error: {e}");
                if let AgentError::Model(inner) = &e {
                    if inner.is_auth_error() {
                        eprintln!("Check that GROQ_API_KEY is set to a valid key.");
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::ToolCallsRequested { calls } => {
            for call in calls {
                println!("Tool call: {}({})", call.tool, call.arguments);
            }
        }
        TurnEvent::ToolResult {
            tool,
            server,
            content,
            truncated,
            is_error,
            ..
        } => {
            let label = if *is_error { "Tool error" } else { "Tool response" };
            let suffix = if *truncated { " [truncated]" } else { "" };
            println!("{label} from {tool}@{server}{suffix}: {content}");
        }
    }
}
