use std::net::SocketAddr;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod http;
mod ws;

#[derive(Parser)]
#[command(name = "parley-gateway", about = "WebSocket gateway for the Parley chat hub")]
struct Args {
    /// Path to parley.toml. Falls back to PARLEY_CONFIG, then
    /// ~/.parley/parley.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_gateway=info,parley_hub=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("PARLEY_CONFIG").ok());
    let config = parley_core::config::ParleyConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            warn!("Config load failed ({}), using defaults", e);
            parley_core::config::ParleyConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = app::build_state(config).await?;
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Parley gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
