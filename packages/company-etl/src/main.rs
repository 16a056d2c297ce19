// Stage runner for the company discovery pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use company_etl::{pipeline, Config};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "company-etl")]
#[command(about = "Discover Australian company websites and match them to the ABR")]
struct Cli {
    /// Artifact directory (overrides DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the crawl index and extract company records
    Crawl,

    /// Read the ABR bulk extract
    Registry,

    /// Classify crawl/registry pairs
    Match,

    /// Write confirmed matches to Postgres
    Persist,

    /// All stages in order
    Run,
}

/// One JSON line per stage so a scheduler can pick up the counts.
fn report<T: Serialize>(stage: &str, stats: &T) -> Result<()> {
    let line = serde_json::json!({ "stage": stage, "stats": stats });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,company_etl=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    tracing::info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Crawl => report("crawl", &pipeline::crawl_stage(&config).await?)?,
        Commands::Registry => report("registry", &pipeline::registry_stage(&config).await?)?,
        Commands::Match => report("match", &pipeline::match_stage(&config).await?)?,
        Commands::Persist => report("persist", &pipeline::persist_stage(&config).await?)?,
        Commands::Run => pipeline::run_all(&config).await?,
    }

    Ok(())
}
