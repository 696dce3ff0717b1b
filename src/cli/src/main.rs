//! hubsync CLI - inspect the central aggregator's view of leaf hubs.
//!
//! Provides bundle status, health, and configuration commands.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{bundles, config, health};
use output::OutputFormat;

/// hubsync - status bundle synchronization CLI
#[derive(Parser)]
#[command(
    name = "hubsync",
    version,
    about = "Inspect status bundles conflated by a hubsync central server",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Central server URL
    #[arg(long, global = true, env = "HUBSYNC_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List conflation state of all tracked bundles
    Status(bundles::StatusArgs),

    /// Show one bundle and its applied content
    Show(bundles::ShowArgs),

    /// Check central server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = run(cli, format).await;

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, format: OutputFormat) -> Result<()> {
    let file_config = config::load_config()?;
    let api_url = cli.api_url.unwrap_or_else(|| file_config.api_url.clone());

    match cli.command {
        Commands::Config(cmd) => config::execute(cmd, format).await,
        Commands::Status(mut args) => {
            args.leaf_hub = args.leaf_hub.or(file_config.leaf_hub);
            bundles::status(args, &client::ApiClient::new(&api_url)?, format).await
        }
        Commands::Show(args) => bundles::show(args, &client::ApiClient::new(&api_url)?, format).await,
        Commands::Health(args) => {
            health::execute(args, &client::ApiClient::new(&api_url)?, format).await
        }
    }
}
