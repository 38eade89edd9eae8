//! Shopilent API server.
//!
//! Commands:
//! - `shopilent serve` - run the HTTP API and the outbox worker (default)
//! - `shopilent migrate` - apply database migrations and exit
//! - `shopilent config` - print the effective configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shopilent_api::{assemble, router, Settings};
use shopilent_postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Shopilent order, payment and outbox service
#[derive(Parser)]
#[command(name = "shopilent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.host/server.port
    #[arg(long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the outbox worker
    Serve,

    /// Apply database migrations and exit
    Migrate,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?.with_env()?;
    settings.validate()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings, cli.bind).await,
        Commands::Migrate => {
            let store = connect(&settings).await?;
            store.migrate().await?;
            info!("migrations applied");
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&redacted(settings))?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect(settings: &Settings) -> Result<PgStore> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to database")?;
    Ok(PgStore::new(pool))
}

async fn serve(settings: Settings, bind: Option<String>) -> Result<()> {
    let store = Arc::new(connect(&settings).await?);
    if settings.database.migrate {
        store.migrate().await?;
    }

    let runtime = assemble(store, &settings)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = settings.outbox.enabled.then(|| {
        let worker = runtime.worker;
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    });

    let address = bind.unwrap_or_else(|| settings.server.address());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!(%address, outbox = settings.outbox.enabled, "listening");

    axum::serve(listener, router(runtime.state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker {
        handle.await.context("outbox worker panicked")?;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Settings with secrets blanked for printing.
fn redacted(mut settings: Settings) -> Settings {
    for provider in settings.webhooks.providers.values_mut() {
        provider.secret = "<redacted>".to_string();
    }
    settings.auth.tokens = settings
        .auth
        .tokens
        .into_values()
        .enumerate()
        .map(|(i, grant)| (format!("<token-{i}>"), grant))
        .collect();
    settings
}
