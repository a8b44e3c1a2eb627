use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use free_packages::api::{self, SecurityConfig};
use free_packages::classify::DiffClassifier;
use free_packages::commands;
use free_packages::config::AppConfig;
use free_packages::db::Database;
use free_packages::host::FreePackages;
use free_packages::models::StatusReport;
use free_packages::stream::{HttpCatalogClient, StreamError};

#[derive(Parser)]
#[command(name = "freepkgs")]
#[command(about = "Claims free catalog packages on managed accounts")]
struct Cli {
    /// Configuration file (defaults to config.json in the config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the change stream and claim for configured accounts
    Run {
        /// Port for the status API (overrides the configuration)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the persisted change cursor
    Cursor,
    /// Query a running instance for its status
    Status,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "free_packages=info,tower_http=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let db = match config.database_path() {
        Some(path) => Database::open_or_recover(path)?,
        None => Database::open_default()?,
    };
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run { port: None }) {
        Commands::Run { port } => run(config, port).await?,
        Commands::Cursor => {
            let db = open_database(&config)?;
            println!("{}", commands::format_cursor(&db.cursor_summary()?));
        }
        Commands::Status => {
            let url = format!("http://127.0.0.1:{}/api/v1/status", config.api.port);
            let mut request = reqwest::Client::new().get(&url);
            if let Some(key) = &config.api.api_key {
                request = request.bearer_auth(key);
            }
            let report: StatusReport = request
                .send()
                .await
                .with_context(|| format!("no instance answering on {}", url))?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", commands::render_report(&report));
        }
    }

    Ok(())
}

async fn run(config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let client = HttpCatalogClient::new(config.catalog.clone())?;
    let host = FreePackages::new(db, Arc::new(client.clone()), config.executor.clone());
    let cursor = host.on_init()?;

    for (account_id, account_config) in &config.accounts {
        // Failures are logged by the host and only affect that account.
        let _ = host.on_account_module_init(account_id, account_config).await;
    }

    let port = port.unwrap_or(config.api.port);
    let security = SecurityConfig::from_key(config.api.api_key.clone());
    let app = api::create_router_with_config(host.clone(), security);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Status API listening on http://127.0.0.1:{}", port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Status API stopped");
        }
    });

    let classifier = DiffClassifier::new(
        Arc::new(client.clone()),
        Arc::new(config.eligibility.clone()),
    )
    .with_chunk_size(config.catalog.lookup_chunk);
    let mut pipeline = host.listener(client, classifier, cursor);
    let reconnect_delay = Duration::from_secs(config.catalog.reconnect_delay_secs);

    loop {
        let result = tokio::select! {
            result = pipeline.run() => result,
            _ = tokio::signal::ctrl_c() => break,
        };
        match result {
            Ok(()) => tracing::info!("Change stream closed by remote"),
            Err(StreamError::Unauthorized) => {
                host.shutdown().await;
                anyhow::bail!("catalog rejected the configured key");
            }
            Err(e) => tracing::warn!(
                error = %e,
                resume_from = pipeline.cursor().last_sequence,
                "Change stream failed, reconnecting"
            ),
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    host.shutdown().await;
    Ok(())
}
