use anyhow::{Context, Result};
use api::{ApiClient, ChainFetcher};
use clap::Parser;
use config::Config;
use detector::ChainDetector;
use dotenv::dotenv;
use interrupts::{on_panic, on_sigterm};
use logs::init_logs;
use metrics::init_metrics;
use scanner::Scanner;
use server::start_server;
use std::sync::Arc;
use std::time::Duration;
use store::SqliteStore;
use telegram::TelegramNotifier;
use tokio::spawn;
use tracing::{error, info, warn};

mod api;
mod config;
mod detector;
mod interrupts;
mod logs;
mod metrics;
mod scanner;
mod server;
mod store;
mod telegram;
mod types;

#[ntex::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logs();

    let config = Config::parse();

    let store = Arc::new(
        SqliteStore::connect(&config.database_path)
            .await
            .context("Opening chain database")?,
    );
    let detector = ChainDetector::new(store.clone());
    let fetcher =
        Arc::new(ApiClient::new(config.api_url.clone()).context("Building API client")?);

    if config.init_only {
        return init_database(store, detector, fetcher, &config).await;
    }

    init_metrics("newchain_detector")?;

    let notifier = Arc::new(TelegramNotifier::new(
        &config.telegram_bot_token,
        config.telegram_chat_id.clone(),
    ));

    let scanner = Arc::new(Scanner::new(
        fetcher,
        detector,
        notifier.clone(),
        store.clone(),
        Duration::from_millis(config.polling_interval_ms),
        config.silent_mode,
    ));

    // log panics
    on_panic(|panic_info| error!(error = %panic_info, "Panic detected!!"));

    info!("Starting NewChain Detector...");
    if config.silent_mode {
        info!("Silent mode enabled - notifications will be skipped");
    } else if let Err(e) = notifier.send_test_message().await {
        warn!(error = %e, "Failed to send test message, but continuing anyway");
    } else {
        info!("Telegram bot connected successfully");
    }

    {
        let scanner = scanner.clone();
        spawn(async move { scanner.run().await });
    }

    {
        let notifier = notifier.clone();
        let scanner = scanner.clone();
        spawn(async move { notifier.poll_commands(scanner).await });
    }

    info!(
        "Bot started! Checking for new chains every {} seconds",
        config.polling_interval_ms / 1000
    );

    // Handlers for both SIGTERM and SIGINT: stop the scan timer, let
    // in-flight writes finish, release the pool.
    let shutdown_scanner = scanner.clone();
    let shutdown_store = store.clone();
    let shutdown_handler = on_sigterm(move || {
        let scanner = shutdown_scanner.clone();
        let store = shutdown_store.clone();
        async move {
            info!("Stopping NewChain Detector...");
            scanner.shutdown();
            store.close().await;
        }
    });

    info!("Starting internal server at {}", &config.server_address);
    let _ = start_server(&config.server_address, scanner.clone()).await;
    let _ = shutdown_handler.await;

    Ok(())
}

/// Seeds the database with one silent scan, then exits. No Telegram traffic
/// at all, matching `--init-only`.
async fn init_database(
    store: Arc<SqliteStore>,
    detector: ChainDetector,
    fetcher: Arc<ApiClient>,
    config: &Config,
) -> Result<()> {
    info!("Initializing database...");

    let chains = fetcher
        .fetch_with_retry()
        .await
        .context("Fetching chain list")?;
    info!("Fetched {} chains from API", chains.len());

    let new_chains = detector.process_chains(&chains).await?;
    store.close().await;

    info!(
        "Database initialized: {} chains saved, {} new, path: {}",
        chains.len(),
        new_chains.len(),
        config.database_path
    );

    Ok(())
}
