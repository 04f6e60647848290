//! Keel: project lifecycle CLI.
//!
//! # Usage
//!
//! ```text
//! keel user add <id> [--admin]
//! keel project create <name> --as <user>
//! keel project get <id-or-name> --as <user> [--json]
//! keel project list --as <user> [--json]
//! keel project delete <id> --as <user>
//! keel reconcile [--dry-run] [--json]
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{project::ProjectCommand, reconcile::ReconcileArgs, user::UserCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    version,
    about = "Manage projects and their backing git repositories",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register users and admin rights.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Create, inspect, list, and delete projects.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Repair store/repository divergence left by interrupted operations.
    Reconcile(ReconcileArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::User { command } => commands::user::run(command),
            Commands::Project { command } => commands::project::run(command).await,
            Commands::Reconcile(args) => args.run().await,
        }
    })
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
