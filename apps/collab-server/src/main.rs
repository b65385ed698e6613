//! Collaborative resume editing WebSocket server

use clap::Parser;
use collaboration::{CollabConfig, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod ws;

#[derive(Parser)]
#[command(name = "collab-server")]
#[command(about = "Hosts shared editing sessions over WebSocket")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("collab_server=debug,collaboration=debug,versioning=info")
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CollabConfig::load(path).await?,
        None => CollabConfig::default(),
    }
    .with_env_overrides();

    if let Some(dir) = &config.data_dir {
        info!("Persisting session history under {:?}", dir);
    }

    let manager = Arc::new(SessionManager::new(config));

    let listener = TcpListener::bind(&args.addr).await?;
    info!("Collaboration server listening on: {}", args.addr);

    while let Ok((stream, addr)) = listener.accept().await {
        info!("New connection from: {}", addr);
        tokio::spawn(ws::handle_connection(stream, addr, manager.clone()));
    }

    Ok(())
}
