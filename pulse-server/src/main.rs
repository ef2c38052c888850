use std::sync::Arc;

use clap::Parser;
use pulse_core::PulseConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use pulse_server::{http, router, server, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,

    /// CSV to preload, overrides `data.default_dataset`
    #[arg(short, long)]
    dataset: Option<String>,

    /// Validate config and the default dataset, then exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is a dev convenience; production sets real env vars
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match PulseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over service.log_level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    let dataset = args
        .dataset
        .clone()
        .or_else(|| config.data.default_dataset.clone());
    let state = Arc::new(AppState::new(config));

    if let Some(path) = dataset.as_deref() {
        match router::load_path(&state, path) {
            Ok(summary) => tracing::info!(
                "Preloaded {} rows from {} (dataset {})",
                summary.rows,
                path,
                summary.dataset
            ),
            Err(e) if args.health => {
                println!("❌ Dataset {} failed to load: {}", path, e);
                std::process::exit(1);
            }
            Err(e) => tracing::warn!("Skipping preload of {}: {}", path, e),
        }
    }

    if args.health {
        println!("✅ Config valid");
        if let Some(path) = dataset {
            println!("✅ Dataset {} loaded", path);
        }
        println!("✅ Pulse health check passed");
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if state.config.http.enabled {
        let http_state = Arc::clone(&state);
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(http_state, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = state.config.service.socket_path.clone();
    server::run_unix_server(&socket_path, state, tx.subscribe()).await?;

    Ok(())
}
