use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use faas_control::cli::{format_dry_run, Args};
use faas_control::commands::Engine;
use faas_control::config::{default_config_path, load_config_from, Config};
use faas_control::server::{create_router, AppState};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    };

    // Dry-run mode: print configuration summary and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &args));
        return;
    }

    if let Err(e) = serve(&args, &config).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let path = args.config.clone().unwrap_or_else(default_config_path);
    load_config_from(&path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))
}

async fn serve(args: &Args, config: &Config) -> anyhow::Result<()> {
    let engine = Engine::from_config(config).context("Failed to initialise engine")?;
    let state = AppState::new(engine.clone());

    let addr = args.listen_addr(config);
    info!("Starting faas-control on {}", addr);
    info!("Serving {} cluster(s)", config.clusters.len());

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health       - Health check");
    info!("  POST /v1/commands  - Function and namespace commands");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Waiting for {} pipeline(s) to finish", engine.in_flight());
    engine.drain().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
