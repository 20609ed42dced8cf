//! stateviz - Statechart inspector
//!
//! Loads a machine definition and drives it from a REPL or one-shot commands.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use stateviz_core::MachineDefinition;
use stateviz_runtime::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stateviz")]
#[command(about = "Inspect and drive hierarchical state machines")]
#[command(version)]
struct Cli {
    /// Machine definition JSON file
    #[arg(short, long)]
    machine: Option<PathBuf>,

    /// YAML config file
    #[arg(short, long, env = "STATEVIZ_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Validate the machine definition
    Validate,

    /// Print the extracted node and edge lists as JSON
    Graph,

    /// Send events in order and print each resulting configuration
    Run {
        /// Events, as NAME or NAME=PAYLOAD_JSON
        events: Vec<String>,

        /// Print full states as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the active ids of the initial state
    Ids,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Defaults, then config file, then STATEVIZ_* overrides
    let config = Config::load_from(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    if !config.inspector.color {
        colored::control::set_override(false);
    }

    let Some(path) = cli.machine.clone().or_else(|| config.inspector.machine.clone()) else {
        eprintln!(
            "{}: no machine definition given (use --machine or STATEVIZ_MACHINE)",
            "Error".red()
        );
        std::process::exit(2);
    };

    let definition = match load_definition(&path) {
        Ok(definition) => definition,
        Err(e) => {
            eprintln!("{} {}: {}", "Invalid machine".red(), path.display(), e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(definition, &config).await?;
        }
        Some(cmd) => match commands::execute(definition, cmd, &config) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

/// Reads and validates a machine definition file.
pub(crate) fn load_definition(path: &Path) -> Result<MachineDefinition, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let definition = MachineDefinition::from_str(&content)?;
    tracing::info!(
        "Loaded machine '{}' from {} (checksum {})",
        definition.name,
        path.display(),
        definition.checksum
    );
    Ok(definition)
}
