mod cli;
mod fetch;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lagoon_sync::{
    ResourceFetcher, ResourceId, StaticFetcher, SyncConfig, SyncEngine, WebSocketHub,
};

use crate::cli::Cli;
use crate::fetch::HttpFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig {
        hub_url: cli.hub_url.clone(),
        auth_token: cli.token.clone(),
        device_id: cli.device_id.clone(),
        ..Default::default()
    };

    let transport = Arc::new(WebSocketHub::new(config.hub_url.as_str()));
    let fetcher: Arc<dyn ResourceFetcher> = match &cli.api_url {
        Some(api_url) => Arc::new(HttpFetcher::new(api_url, &cli.token)?),
        None => StaticFetcher::new(),
    };

    let engine = SyncEngine::new(config, transport, fetcher);
    engine.connect().await.context("hub connect failed")?;
    info!(hub = %cli.hub_url, "connected");

    for code in &cli.watch {
        engine.set_visibility(&ResourceId::from(code.as_str()), true);
        info!(code, "watching");
    }

    let mut notifications = engine
        .notifications()
        .context("notification stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!(?notification, "sync notification");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.stop().await;
    printer.abort();
    Ok(())
}
