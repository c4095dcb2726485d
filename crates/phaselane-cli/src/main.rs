mod bridge;
mod cmd;
mod output;
mod root;
mod wiring;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "phaselane",
    about = "MCP server that gates phase transitions and routes work between quick and complex lanes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .phaselane/ or .git/)
    #[arg(long, global = true, env = "PHASELANE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Run one install-and-verify cycle in a temporary root, then exit
    #[arg(
        long,
        env = "PHASELANE_SMOKE_TEST",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    smoke_test: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize phaselane in the current project
    Init,

    /// Serve the tool catalog over MCP stdio (default)
    Mcp,

    /// List the review checkpoints
    Checkpoints,
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Mcp);

    let default_level = match command {
        Commands::Mcp if !cli.smoke_test => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // stdout carries the protocol; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.smoke_test {
        match cmd::smoke::run() {
            Ok(true) => return,
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
    }

    let root = root::resolve_root(cli.root.as_deref());

    let result = match command {
        Commands::Init => cmd::init::run(&root),
        Commands::Mcp => cmd::mcp::run(&root),
        Commands::Checkpoints => cmd::checkpoints::run(cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
