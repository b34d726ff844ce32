//! # Belle - process entry point
//!
//! Startup order:
//!
//! 1. **Config** - TOML file plus environment overrides
//! 2. **Integrations** - chat platform, spreadsheet and document services
//! 3. **Client** - document cache, per-document queues, command handling
//! 4. **Web API** - serves hunt context until Ctrl+C
//!
//! On shutdown the client drains in-flight work and closes every open
//! document before the process exits.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use belle::cli::{Cli, Commands};
use belle::config::BelleConfig;
use belle_model::InMemoryDocumentService;
use belle_reconciler::{ChatPlatform, DiscordPlatform, DriveSheets};
use belle_runtime::BelleClient;
use belle_web::{AppState, create_router, serve};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = BelleConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let credentials = config
        .credentials()
        .context("Configuration is missing credentials")?;

    if cli.command() == Commands::CheckConfig {
        info!(
            port = config.api.port,
            timeout_secs = config.documents.inactivity_timeout_secs,
            "Configuration OK"
        );
        return Ok(());
    }

    info!("Belle starting...");

    let platform: Arc<dyn ChatPlatform> = Arc::new(
        DiscordPlatform::new(
            config.discord_api_base(),
            credentials.discord_token,
            credentials.client_id.as_str(),
        )
        .context("Failed to configure chat platform")?,
    );
    let sheets = Arc::new(
        DriveSheets::new(
            config.google_api_base(),
            credentials.google_access_token,
            credentials.template_sheet_id,
        )
        .context("Failed to configure spreadsheet service")?,
    );
    // Hunt documents live in this process until a collaborative backend is
    // configured.
    let documents = InMemoryDocumentService::new_arc();

    let client = BelleClient::new(
        platform.clone(),
        documents,
        sheets,
        config.client_config(),
    );
    info!("Client initialized");

    let server = config.server_config();
    let router = create_router(AppState { platform }, &server)
        .context("Failed to build API router")?;

    serve(router, server.bind_address, wait_for_shutdown())
        .await
        .context("API server failed")?;

    client.shutdown().await;
    info!("Belle stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
