use std::sync::Arc;

use anyhow::{Context, Result};
use catalogsync_infra::{
    LwaCredentialProvider, PostgresListingStore, SyncConfig, inspect_item, run_enrichment,
    run_inventory_sync,
};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "catalogsync")]
#[command(about = "Seller catalog sync: inventory reconciliation and catalog enrichment", long_about = None)]
struct Cli {
    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the listings report and reconcile it into the store
    Inventory,
    /// Enrich listings whose catalog metadata is missing or stale
    Enrich,
    /// Inventory sync followed by enrichment
    Run,
    /// Fetch one catalog item and print its string leaves and main image
    Inspect {
        #[arg(long)]
        asin: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.pretty {
        catalogsync_observability::init_pretty();
    } else {
        catalogsync_observability::init();
    }

    let config = SyncConfig::from_env().context("failed to load configuration")?;
    let credentials = LwaCredentialProvider::new(
        config.token_url.clone(),
        config.credentials.clone(),
        config.http_timeout,
    )?;

    match cli.command {
        Commands::Inventory => {
            let store = connect(&config).await?;
            let report = run_inventory_sync(&config, &credentials, store).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Enrich => {
            let store = Arc::new(connect(&config).await?);
            let summary = run_enrichment(&config, &credentials, store).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Run => {
            let store = Arc::new(connect(&config).await?);
            let report = run_inventory_sync(&config, &credentials, Arc::clone(&store))
                .await
                .context("inventory sync failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let summary = run_enrichment(&config, &credentials, store)
                .await
                .context("enrichment failed")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Inspect { asin } => {
            let report = inspect_item(&config, &credentials, &asin)
                .await
                .with_context(|| format!("failed to fetch catalog item {asin}"))?;
            for (path, value) in &report.leaves {
                println!("{path}: {value}");
            }
            println!("main image: {}", report.main_image);
        }
    }

    Ok(())
}

async fn connect(config: &SyncConfig) -> Result<PostgresListingStore> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PostgresListingStore::new(pool);
    store.ensure_schema().await?;
    tracing::info!("listing store ready");
    Ok(store)
}
