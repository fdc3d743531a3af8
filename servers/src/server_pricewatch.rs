use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

use lib_common::catalog::CatalogClient;
use lib_common::chat::{bot_commands, command_stream, TelegramClient, UpdateFeed};
use lib_common::core::{pipeline, retry_forever, FixedBackoff, Lifecycle, Poller, StateDir, CHANNEL_CAPACITY};
use lib_common::retrieve::ky_http::DEFAULT_TIMEOUT;

mod pricewatch_logic;
use pricewatch_logic::{config, logger};

/// Registers the bot's command menu, retrying until it succeeds or shutdown
/// begins. Runs in the background so a Telegram outage does not delay startup.
fn register_commands(client: Arc<TelegramClient>, backoff: FixedBackoff, lifecycle: &Lifecycle) {
    let cancel = lifecycle.token().clone();
    lifecycle.spawn(async move {
        let commands = bot_commands();
        loop {
            match client.set_my_commands(&commands).await {
                Ok(_) => {
                    tracing::info!(count = commands.len(), "Bot command menu registered");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?backoff.delay(), "Failed to register bot commands");
                    if !backoff.wait(&cancel).await {
                        return;
                    }
                }
            }
        }
    });
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "SIGTERM handler unavailable");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Phase 1: Environment, configuration, logging ---
    dotenvy::dotenv().ok();
    let config = config::load_config()?;
    let _log_guard = logger::setup_logging(&config.log_dir, &config.log_level)?;
    match &config.config_file {
        Some(path) => tracing::info!(path = %path.display(), "Config file merged"),
        None => tracing::info!("No config file found, using defaults, CLI arguments and environment"),
    }

    // --- Phase 2: Clients ---
    let catalog = Arc::new(CatalogClient::new(&config.api_uri, DEFAULT_TIMEOUT).context("failed to build the catalog client")?);
    let telegram = Arc::new(
        TelegramClient::new(&config.telegram_api_url, &config.telegram_bot_token, DEFAULT_TIMEOUT)
            .context("failed to build the Telegram client")?,
    );

    let lifecycle = Lifecycle::new();
    let backoff = FixedBackoff::new(config.retry_backoff);
    register_commands(Arc::clone(&telegram), backoff, &lifecycle);

    // --- Phase 3: Incoming commands ---
    let updates = Poller::new("updates", Arc::new(UpdateFeed::new(Arc::clone(&telegram))), config.updates_interval);
    let updates_lifecycle = lifecycle.clone();
    let batches = retry_forever("updates", move || updates.poll(&updates_lifecycle), backoff, CHANNEL_CAPACITY, &lifecycle);
    let commands = command_stream(batches);

    // --- Phase 4: Pipeline ---
    let state = StateDir::new(&config.state_dir);
    let handle = pipeline::spawn(config.pipeline(), catalog, commands, telegram, &state, &lifecycle)
        .with_context(|| format!("failed to start the pipeline in {}", config.state_dir.display()))?;

    // --- Phase 5: Run until signalled ---
    wait_for_signal().await;
    lifecycle.shutdown().await;

    match handle.dispatcher.await {
        Ok(stats) => tracing::info!(delivered = stats.delivered, rejected = stats.rejected, retries = stats.retries, "Delivery summary"),
        Err(e) => tracing::error!(error = %e, "Dispatcher task failed"),
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}
