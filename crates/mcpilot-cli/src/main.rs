//! # mcpilot-cli
//!
//! Command-line interface for Mcpilot.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcpilot_core::error::format_error_with_suggestion;
use mcpilot_core::Config;
use mcpilot_mcp::ClientInfo;

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
}

impl AppContext {
    /// Client identity sent during the handshake.
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo::new(&self.config.client.name, &self.config.client.version)
    }
}

/// Mcpilot - drive MCP tool servers from the command line
#[derive(Parser)]
#[command(name = "mcpilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server executable, overriding [server].command
    #[arg(long, global = true, value_name = "COMMAND")]
    server_cmd: Option<String>,

    /// Server argument (repeatable), overriding [server].args
    #[arg(long = "server-arg", global = true, value_name = "ARG", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and list its tools
    Tools,
    /// Call a single tool and print the decoded result
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Print the decoded result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the agent loop on a task
    Run {
        /// Task for the agent
        task: String,
        /// Override [agent].max_iterations
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the user configuration directory
    Path,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref command) = self.server_cmd {
            config.server.command = command.clone();
            config.server.args = self.server_args.clone();
        } else if !self.server_args.is_empty() {
            config.server.args = self.server_args.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for results
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_validated(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let ctx = AppContext { config };

    match cli.command {
        Commands::Tools => commands::tools::run(&ctx).await,
        Commands::Call { tool, args, json } => {
            commands::call::run(&ctx, &tool, &args, json).await
        }
        Commands::Run {
            task,
            max_iterations,
        } => commands::run::run(&ctx, &task, max_iterations).await,
        Commands::Config { action } => commands::config::handle(action, &ctx),
    }
}

/// Render an error, with a recovery suggestion when one is known.
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<mcpilot_core::Error>() {
        Some(e) => format_error_with_suggestion(e),
        None => format!("{:#}", error),
    }
}
