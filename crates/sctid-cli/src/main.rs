#![doc = include_str!("../README.md")]

mod cli;

use clap::Parser;
use cli::config::{AppConfig, CliArgs};
use cli::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let mut stdout = std::io::stdout().lock();
    let result = cli::commands::run(config, token, &mut stdout).await;
    if let Err(err) = &result {
        tracing::error!("{err:#}");
    }

    providers.shutdown();
    result
}

fn log_startup_info(config: &AppConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Running with full config: {config:#?}");
    }
    if let Some(authority) = &config.authority {
        tracing::info!("Using identifier authority at {}", authority.base_url);
    }
}

/// Cancels `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, abandoning current command...");
    token.cancel();
}
