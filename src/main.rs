use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use draftsmith_core::config::{AppConfig, Variant};
use draftsmith_core::error::DraftsmithError;
use draftsmith_core::event::EventBus;
use draftsmith_core::types::AgentEvent;

use draftsmith_agent::{GraphContext, Orchestrator, SessionHandle, SessionManager};
use draftsmith_llm::LlmCompleter;

#[derive(Parser)]
#[command(name = "draftsmith", version, about = "Conversational email drafting assistant")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "draftsmith.toml")]
    config: PathBuf,

    /// Override the orchestration variant (routing or agent)
    #[arg(long, env = "DRAFTSMITH_VARIANT")]
    variant: Option<Variant>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL mode
    Repl,
    /// Run a single prompt and exit
    Run {
        /// Email to work on
        #[arg(long, short)]
        document: Option<PathBuf>,
        /// The request to send
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draftsmith=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "draftsmith", &mut io::stdout());
        return Ok(());
    }

    let mut config = load_config(&cli.config)?;
    if let Some(variant) = cli.variant {
        config.assistant.variant = variant;
    }

    if let Some(Commands::Config) = &cli.command {
        let mut shown = config.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("***".into());
        }
        println!("{}", toml::to_string_pretty(&shown)?);
        return Ok(());
    }

    // Set up components
    let event_bus = Arc::new(EventBus::default());
    let llm = draftsmith_llm::create_client(&config.model)?;
    let completer = LlmCompleter::new(llm, config.model.clone()).with_events(event_bus.clone());
    let ctx = GraphContext::new(
        Arc::new(completer),
        config.prompts.clone(),
        config.assistant.clone(),
        event_bus.clone(),
    );
    let orchestrator = Orchestrator::new(Arc::new(ctx));
    let manager = SessionManager::new(orchestrator, event_bus);

    info!(
        provider = %config.model.provider,
        model = %config.model.model_id,
        variant = ?config.assistant.variant,
        "Draftsmith ready"
    );

    match cli.command {
        Some(Commands::Run { document, prompt }) => {
            let input = prompt.join(" ");
            if input.trim().is_empty() {
                anyhow::bail!("No prompt given");
            }
            let session = manager.start_session();
            if let Some(path) = document {
                let text = std::fs::read_to_string(&path)?;
                manager.set_uploaded_document(&session, &text).await?;
            }
            run_once(&manager, &session, &input).await?;
        }
        Some(Commands::Repl) | None => run_repl(&manager, &config).await?,
        Some(Commands::Config) | Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    warn!(path = %path.display(), "No config file found, using defaults");
    eprintln!("Warning: no config file found. Set OPENAI_API_KEY or create draftsmith.toml");
    let mut config = AppConfig::default();
    config.model.api_key = std::env::var("OPENAI_API_KEY").ok();
    config.model.base_url = std::env::var("OPENAI_BASE_URL").ok();
    Ok(config)
}

/// Token and latency totals for one turn.
struct TurnStats {
    input_tokens: u64,
    output_tokens: u64,
    error: Option<String>,
}

/// Run one turn, printing progress to stderr and the answer to stdout.
///
/// Ctrl-C cancels the turn; the session keeps its previous state.
async fn run_once(
    manager: &SessionManager,
    session: &SessionHandle,
    input: &str,
) -> anyhow::Result<()> {
    let before = manager.state(session).await?.messages.len();
    let started = Instant::now();

    let mut rx = manager.events().subscribe();
    let printer = tokio::spawn(async move {
        let mut stats = TurnStats {
            input_tokens: 0,
            output_tokens: 0,
            error: None,
        };
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                AgentEvent::RouteDecided { decision } => {
                    eprintln!("[route: {} ({})]", decision.kind, decision.rationale);
                }
                AgentEvent::ToolStart { name, .. } => eprintln!("[tool: {}]", name),
                AgentEvent::ToolEnd { name, result } if result.is_error => {
                    eprintln!("[{}: ERROR] {}", name, truncate(&result.content, 200));
                }
                AgentEvent::UsageUpdate {
                    input_tokens,
                    output_tokens,
                } => {
                    stats.input_tokens += input_tokens;
                    stats.output_tokens += output_tokens;
                }
                AgentEvent::TurnComplete { .. } => break,
                AgentEvent::TurnError { error, .. } => {
                    stats.error = Some(error);
                    break;
                }
                _ => {}
            }
        }
        stats
    });

    let mut stream = manager.submit_turn(session, input)?;
    let mut last = None;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(snapshot)) => last = Some(snapshot),
                Some(Err(_)) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                manager.cancel_turn(session)?;
            }
        }
    }
    drop(stream);

    let stats = printer.await?;
    if let Some(snapshot) = last.filter(|s| s.is_final) {
        for text in snapshot.new_assistant_text(before) {
            println!("{}\n", text);
        }
    }
    match &stats.error {
        Some(error) if error == &DraftsmithError::Cancelled.to_string() => {
            eprintln!("[cancelled]");
        }
        Some(error) => eprintln!("[error: {}]", error),
        None => eprintln!(
            "[done: {:.1}s, {}in/{}out tokens]",
            started.elapsed().as_secs_f64(),
            stats.input_tokens,
            stats.output_tokens
        ),
    }
    Ok(())
}

async fn run_repl(manager: &SessionManager, config: &AppConfig) -> anyhow::Result<()> {
    let session = manager.start_session();
    println!("Draftsmith v{}", env!("CARGO_PKG_VERSION"));
    println!("Session: {}", session.id());
    println!("Variant: {:?}", config.assistant.variant);
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let (command, arg) = match input.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (input, ""),
        };
        match command {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("  /document FILE  load the email to work on");
                println!("  /draft          show the current draft");
                println!("  /reset          start over");
                println!("  /quit           exit");
            }
            "/document" => {
                if arg.is_empty() {
                    println!("Usage: /document FILE");
                    continue;
                }
                match std::fs::read_to_string(arg) {
                    Ok(text) => {
                        manager.set_uploaded_document(&session, &text).await?;
                        println!("Loaded {} ({} chars)", arg, text.chars().count());
                    }
                    Err(e) => println!("Cannot read {}: {}", arg, e),
                }
            }
            "/draft" => match manager.state(&session).await?.draft {
                Some(draft) => println!("{}\n", draft),
                None => println!("No draft yet."),
            },
            "/reset" => {
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt("Discard the conversation, document and draft?")
                    .default(false)
                    .interact()
                    .unwrap_or(false);
                if confirmed {
                    manager.reset_session(&session).await?;
                    println!("Session reset.");
                }
            }
            _ if command.starts_with('/') => {
                println!("Unknown command: {} (try /help)", command);
            }
            _ => run_once(manager, &session, input).await?,
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
