//! hubsync central aggregator - main entry point
//!
//! Receives bundles from leaf agents over HTTP and conflates them per
//! (leaf hub, category).

use std::net::SocketAddr;

use clap::Parser;

use hubsync_core::{
    api::{self, AppState},
    config::Config,
    shutdown, telemetry,
};

#[derive(Parser)]
#[command(name = "hubsync-central", version, about = "Central bundle aggregator")]
struct Args {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, env = "HUBSYNC_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load_from(args.config.as_deref())?;
    config.validate()?;

    telemetry::init_logging(&config.logging)?;
    telemetry::init_metrics(&config.metrics, "hubsync-central")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting hubsync central"
    );

    let app = api::build_router(AppState::in_memory());

    let addr: SocketAddr = config.central.bind_addr().parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
