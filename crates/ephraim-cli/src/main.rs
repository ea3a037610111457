//! Ephraim - senior-engineer terminal coding agent.
//!
//! Single binary: `run` (default) starts the interactive loop; `status`,
//! `config`, `reset` and `version` are one-shot commands.

mod ui;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use anyhow::Result;

use ephraim_core::agent::subagent::SubAgentSupervisor;
use ephraim_core::agent::{AgentLoop, AgentServices};
use ephraim_core::history::CommandHistory;
use ephraim_core::hooks::HookRunner;
use ephraim_core::mcp::McpManager;
use ephraim_core::model::{ChatBackend, ModelInterface, OllamaBackend};
use ephraim_core::prompter::Prompter as _;
use ephraim_core::tasks::TaskManager;
use ephraim_core::tools::{implementations::register_all_tools, ToolRegistry};
use ephraim_core::{boot, paths, EphraimConfig, SessionState, StateManager};
use ui::{ConsolePrompter, Interrupted};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Senior-engineer terminal coding agent
#[derive(Parser)]
#[command(name = "ephraim", version = VERSION, about = "Senior-engineer terminal coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Raise console logging to debug
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive loop (default)
    Run,
    /// Print phase, goal, git and iteration summary
    Status,
    /// Print the effective configuration
    Config,
    /// Rewrite Context.md to its default template
    Reset,
    /// Print the version
    Version,
}

fn init_tracing(repo_root: &std::path::Path, debug: bool) -> Result<()> {
    let log_file = paths::session_log_file(repo_root);
    let file = std::fs::File::create(&log_file)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_filter(EnvFilter::new("info"));

    let console_level = if debug { "debug" } else { "warn" };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level)),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    Ok(())
}

fn show_status(state: &SessionState) {
    println!("Phase: {}", state.phase);
    println!("Repository: {}", state.repo_root.display());
    if state.current_goal.is_empty() {
        println!("Current Goal: None");
    } else {
        println!("Current Goal: {}", state.current_goal);
    }
    println!("Git:");
    let branch = if state.git.branch.is_empty() {
        "N/A"
    } else {
        &state.git.branch
    };
    println!("  Branch: {branch}");
    println!("  Clean: {}", state.git.is_clean);
    if !state.git.modified_files.is_empty() {
        println!("  Modified: {}", state.git.modified_files.join(", "));
    }
    if !state.git.untracked_files.is_empty() {
        println!("  Untracked: {}", state.git.untracked_files.join(", "));
    }
    println!(
        "Iterations: {}/{}",
        state.execution.iteration, state.execution.max_iterations
    );
    println!("Actions taken: {}", state.action_history.len());
}

fn show_config(config: &EphraimConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("Cannot render configuration: {e}"),
    }
}

async fn run_interactive(
    state: SessionState,
    config: EphraimConfig,
    repo_root: PathBuf,
) -> Result<()> {
    let config = Arc::new(config);
    let prompter = Arc::new(ConsolePrompter::new());

    let backend: Arc<dyn ChatBackend> = Arc::new(OllamaBackend::new(&config.model)?);
    if !backend.is_available().await {
        prompter.warn(&format!(
            "Model backend unreachable at {}. Running in limited mode.",
            config.model.endpoint
        ));
    }

    let registry = Arc::new(ToolRegistry::new());
    register_all_tools(&registry).await;

    let mcp = if config.mcp_servers.is_empty() {
        None
    } else {
        let manager = Arc::new(McpManager::new());
        let connected = manager.connect_all(&config.mcp_servers, &repo_root).await;
        tracing::info!(connected, "MCP servers connected");
        Some(manager)
    };

    let services = AgentServices {
        config: Arc::clone(&config),
        registry,
        model: ModelInterface::new(
            Arc::clone(&backend),
            config.model.planning_model.clone(),
            config.model.execution_model.clone(),
        ),
        prompter: prompter.clone(),
        subagents: Arc::new(SubAgentSupervisor::new(
            Arc::clone(&backend),
            config.model.execution_model.clone(),
        )),
        tasks: Arc::new(TaskManager::new()),
        mcp,
        hooks: HookRunner::from_config_lines(&config.hook_lines),
        history: CommandHistory::open_default(),
        streaming: false,
    };

    let manager = StateManager::new(state, config);
    AgentLoop::new(manager, services).run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        println!("ephraim {VERSION}");
        return ExitCode::SUCCESS;
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let repo_root = ephraim_core::git::detect_repo_root(&cwd);

    if let Err(e) = boot::ensure_log_dir(&repo_root) {
        eprintln!("Boot failed: {e}");
        return ExitCode::from(1);
    }
    if let Err(e) = init_tracing(&repo_root, cli.debug) {
        eprintln!("Boot failed: cannot initialize logging: {e}");
        return ExitCode::from(1);
    }

    let (state, config) = match boot::boot(repo_root.clone()) {
        Ok(booted) => booted,
        Err(e) => {
            eprintln!("Boot failed: {e}");
            return ExitCode::from(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Version => unreachable!("handled above"),
        Commands::Status => {
            show_status(&state);
            ExitCode::SUCCESS
        }
        Commands::Config => {
            show_config(&config);
            ExitCode::SUCCESS
        }
        Commands::Reset => {
            let path = paths::context_doc_path(&repo_root);
            match std::fs::write(&path, ephraim_core::config::default_context_doc()) {
                Ok(()) => {
                    println!("Reset Context.md at {}", path.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Reset failed: {e}");
                    ExitCode::from(1)
                }
            }
        }
        Commands::Run => match run_interactive(state, config, repo_root).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) if e.downcast_ref::<Interrupted>().is_some() => {
                println!("\nExiting...");
                ExitCode::from(130)
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::from(1)
            }
        },
    }
}
