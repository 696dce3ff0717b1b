//! hubsync leaf agent - main entry point
//!
//! Reads watch events as JSON lines (from stdin or a file), keeps one status
//! bundle per category and publishes snapshots to the central aggregator.
//!
//! Each line looks like:
//!
//! ```json
//! {"kind": "update", "category": "managed-clusters", "object": {"metadata": {"name": "c1"}}}
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;

use hubsync_core::{
    agent::{AgentSupervisor, FileIncarnationStore, IncarnationStore, WatchEvent},
    config::Config,
    shutdown, telemetry,
    transport::{HttpTransport, RetryingTransport},
};

/// Upper bound for the final flush on shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "hubsync-agent", version, about = "Leaf hub status agent")]
struct Args {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, env = "HUBSYNC_CONFIG")]
    config: Option<String>,

    /// Leaf hub name, overriding the configuration
    #[arg(long)]
    leaf_hub: Option<String>,

    /// Read watch events from this file instead of stdin
    #[arg(short, long)]
    input: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load_from(args.config.as_deref())?;
    if let Some(leaf_hub) = args.leaf_hub {
        config.agent.leaf_hub_name = leaf_hub;
    }
    config.validate_agent()?;

    telemetry::init_logging(&config.logging)?;

    let incarnation = FileIncarnationStore::new(&config.agent.incarnation_file)
        .next_incarnation()
        .await?;

    let transport = RetryingTransport::new(
        HttpTransport::new(&config.transport.http)?,
        config.transport.retry.clone(),
    );
    tracing::info!(
        leaf_hub = %config.agent.leaf_hub_name,
        incarnation,
        central_url = %config.transport.http.central_url,
        "Starting hubsync agent"
    );

    let agent = AgentSupervisor::new(config.agent.options(incarnation), Arc::new(transport))?;
    agent.start();

    let input: Box<dyn AsyncRead + Send + Unpin> = match &args.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };

    tokio::select! {
        applied = agent.consume(watch_events(input)) => {
            tracing::info!(applied, "Watch stream ended");
        }
        _ = shutdown::shutdown_signal() => {}
    }

    agent.shutdown().await;
    match tokio::time::timeout(FLUSH_TIMEOUT, agent.flush()).await {
        Ok(Ok(())) => tracing::info!("Final bundles delivered"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Final flush incomplete"),
        Err(_) => tracing::warn!("Final flush timed out"),
    }

    Ok(())
}

/// Parse JSON lines into watch events, skipping lines that do not parse.
fn watch_events(
    input: impl AsyncRead + Send + Unpin,
) -> impl futures::Stream<Item = WatchEvent> + Send {
    LinesStream::new(BufReader::new(input).lines())
        .take_while(|line| {
            if let Err(e) = line {
                tracing::error!(error = %e, "Failed to read watch input");
            }
            futures::future::ready(line.is_ok())
        })
        .filter_map(|line| async move {
            let line = line.ok()?;
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<WatchEvent>(&line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed watch event");
                    None
                }
            }
        })
}
