// crates/mcpp-cli/src/main.rs
// ============================================================================
// Module: MCPP CLI Entry Point
// Description: Command dispatcher for the MCPP privacy proxy.
// Purpose: Run the server and validate configuration from the command line.
// Dependencies: clap, mcpp-config, mcpp-server, tokio
// ============================================================================

//! ## Overview
//! The MCPP CLI starts the JSON-RPC server over the configured transport and
//! offers an offline configuration check. Configuration resolution follows
//! the library rules: explicit `--config`, the `MCPP_CONFIG` environment
//! variable, then `mcpp.toml` in the working directory.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use mcpp_config::McppConfig;
use mcpp_server::McppServer;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// MCPP privacy proxy command line.
#[derive(Debug, Parser)]
#[command(name = "mcpp", version, about = "Model Context Privacy Protocol server")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Start the MCPP server with the configured transport.
    Serve {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then exit.
    ValidateConfig {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
        } => serve(config).await,
        Command::ValidateConfig {
            config,
        } => validate_config(config),
    }
}

/// Runs the server until the transport stops.
async fn serve(config: Option<PathBuf>) -> ExitCode {
    let config = match load_config(config) {
        Ok(config) => config,
        Err(exit) => return exit,
    };
    let server = match McppServer::from_config(config) {
        Ok(server) => server,
        Err(err) => return fail(&format!("mcpp: {err}")),
    };
    match server.serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(&format!("mcpp: {err}")),
    }
}

/// Validates configuration without starting the server.
fn validate_config(config: Option<PathBuf>) -> ExitCode {
    match load_config(config) {
        Ok(_) => {
            let _ = writeln!(std::io::stderr(), "mcpp: configuration is valid");
            ExitCode::SUCCESS
        }
        Err(exit) => exit,
    }
}

/// Loads configuration, reporting failures on stderr.
fn load_config(path: Option<PathBuf>) -> Result<McppConfig, ExitCode> {
    McppConfig::load(path.as_deref()).map_err(|err| fail(&format!("mcpp: {err}")))
}

/// Prints a failure message and returns the failure exit code.
fn fail(message: &str) -> ExitCode {
    let _ = writeln!(std::io::stderr(), "{message}");
    ExitCode::FAILURE
}
