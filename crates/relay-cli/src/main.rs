//! relay - streaming tool-use client

mod config;
mod utils;

use clap::Parser;
use relay_agent::{
    AutoApprove, BackendHandle, InterceptingDispatcher, LocalFallback, McpBackend,
    PendingToolUse, RoutingDispatcher, Session, SessionConfig, SessionEvent, SharedDispatcher,
};
use relay_ai::{providers::anthropic::AnthropicProvider, Role};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::config::{ApprovalMode, Config, McpConfig};
use crate::utils::{is_affirmative, truncate_chars};

/// relay - chat with a model that can call tools, one approved step at a time
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: claude-sonnet-4-5-20250929)
    #[arg(short, long)]
    model: Option<String>,

    /// MCP server command to use as the tool backend
    #[arg(long)]
    mcp_command: Option<String>,

    /// Argument passed to the MCP server (repeatable)
    #[arg(long = "mcp-arg", allow_hyphen_values = true)]
    mcp_args: Vec<String>,

    /// Send tool results back without asking
    #[arg(long)]
    auto_approve: bool,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// How a call to [`drive`] ended
enum Drive {
    Settled,
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("relay=debug,relay_ai=debug,relay_agent=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = Config::load();

    let Some(api_key) = cfg.get_api_key() else {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export ANTHROPIC_API_KEY=your-key");
        eprintln!("Or add it to config file: relay --init-config");
        std::process::exit(1);
    };

    let model = cfg.model(args.model.clone());
    let client = Arc::new(AnthropicProvider::new(api_key));

    // CLI takes precedence over the config file
    let mcp = match args.mcp_command.clone() {
        Some(command) => Some(McpConfig {
            command,
            args: args.mcp_args.clone(),
        }),
        None => cfg.mcp.clone(),
    };
    let fallback = Arc::new(LocalFallback::new());
    let backend = connect_backend(mcp);

    let routing: SharedDispatcher = Arc::new(RoutingDispatcher::new(backend, fallback.clone()));
    let dispatcher: SharedDispatcher = if cfg.intercept.is_empty() {
        routing
    } else {
        Arc::new(InterceptingDispatcher::new(
            cfg.intercept.clone(),
            fallback,
            routing,
        ))
    };

    let mut session_config = SessionConfig::new(model);
    session_config.system_prompt = cfg.system_prompt.clone();

    let mut session = Session::new(session_config, client, dispatcher);
    if args.auto_approve || cfg.approval == ApprovalMode::Auto {
        session = session.with_approval(AutoApprove);
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        println!("relay> {}", command);
        println!();
        return run_turn(&mut session, &command).await;
    }

    run_interactive(&mut session).await
}

/// Start connecting to the MCP server in the background.
///
/// The returned handle settles once the server is up or has failed; tool
/// calls made before then wait for it.
fn connect_backend(mcp: Option<McpConfig>) -> BackendHandle {
    let Some(mcp) = mcp else {
        return BackendHandle::unavailable("no MCP server configured");
    };

    let handle = BackendHandle::pending();
    let slot = handle.clone();
    tokio::spawn(async move {
        let settled = match McpBackend::spawn(&mcp.command, &mcp.args).await {
            Ok(backend) => slot.resolve(Arc::new(backend)),
            Err(e) => {
                eprintln!("Warning: {}; using the built-in editor", e);
                slot.fail(e.to_string())
            }
        };
        if let Err(e) = settled {
            tracing::warn!("Could not settle tool backend: {}", e);
        }
    });
    handle
}

async fn run_interactive(session: &mut Session) -> anyhow::Result<()> {
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("relay ({})", session.config().model.id);
        eprintln!("Ctrl-C interrupts a response; /quit exits.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit") {
            break;
        }

        println!();
        run_turn(session, input).await?;
        println!();
    }

    Ok(())
}

/// Submit `prompt` and keep going until the model stops asking for tools
/// or the user declines a result.
async fn run_turn(session: &mut Session, prompt: &str) -> anyhow::Result<()> {
    let mut rx = session.subscribe();
    session.submit(prompt)?;

    loop {
        if let Drive::Interrupted = drive(session, &mut rx).await {
            let stopped_stream = session.cancel_stream();
            let stopped_tool = session.cancel_tool();
            print_events(&mut rx);
            if stopped_stream || stopped_tool {
                println!("[Interrupted]");
            }
            return Ok(());
        }

        let Some(pending) = session.pending_tool_use().cloned() else {
            return Ok(());
        };
        if confirm(&pending)? {
            session.approve();
        } else {
            session.cancel_tool();
            print_events(&mut rx);
            return Ok(());
        }
    }
}

/// Apply background reports until the session settles or the user hits Ctrl-C
async fn drive(session: &mut Session, rx: &mut broadcast::Receiver<SessionEvent>) -> Drive {
    loop {
        let outcome = tokio::select! {
            more = session.pump() => {
                if more { None } else { Some(Drive::Settled) }
            }
            _ = tokio::signal::ctrl_c() => Some(Drive::Interrupted),
        };
        print_events(rx);
        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

fn confirm(pending: &PendingToolUse) -> anyhow::Result<bool> {
    print!("Send the {} result back to the model? [y/N] ", pending.tool_name);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

fn print_events(rx: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => print_event(&event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("Missed {} session events", n);
            }
            Err(_) => break,
        }
    }
    let _ = io::stdout().flush();
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageAppended { message } => match message.role {
            Role::Assistant if !message.content.is_empty() => print!("{}", message.content),
            Role::ToolUse => println!("\n[{}]", message.content.replace('\n', " | ")),
            Role::ToolResult => println!("[Result: {}]", truncate_chars(&message.content, 200)),
            _ => {}
        },
        SessionEvent::TextDelta { delta, .. } => print!("{}", delta),
        SessionEvent::StreamEnded { .. } => println!(),
        SessionEvent::ToolStarted { tool_name, .. } => println!("[Running {}...]", tool_name),
        SessionEvent::ToolSkipped { tool_name, .. } => {
            println!("[Skipped {}: another tool use is outstanding]", tool_name)
        }
        SessionEvent::ToolCancelled { tool_use_id } => println!("[Cancelled {}]", tool_use_id),
        SessionEvent::ResultApproved { .. } => println!("[Result sent]"),
        SessionEvent::Error { message } => eprintln!("Error: {}", message),
        SessionEvent::StreamStarted | SessionEvent::ApprovalRequested { .. } => {}
    }
}
