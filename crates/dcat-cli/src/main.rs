use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dcat_storage::RecordStore;
use dcat_sync::{catalog_error, CatalogSource, ImportConfig, ImportPipeline, ImportSummary};
use dcat_web::{AppState, WebConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dcat-cli")]
#[command(about = "Mirror a DCAT-US data.json catalog into SQLite and serve it")]
struct Cli {
    /// Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import the catalog, then serve it over HTTP.
    Serve {
        /// Serve whatever is already stored.
        #[arg(long)]
        skip_import: bool,
        /// Import from a local data.json instead of the catalog URL.
        #[arg(long)]
        from_file: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one import batch and exit.
    Import {
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Create the tables if they are missing.
    Migrate,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

async fn run_import(pipeline: &ImportPipeline, from_file: Option<PathBuf>) -> Result<ImportSummary> {
    let source = match from_file {
        Some(path) => CatalogSource::File(path),
        None => CatalogSource::Remote(pipeline.config().catalog_url.clone()),
    };
    pipeline.run_from_source(&source).await.map_err(|err| {
        if let Some(kind) = catalog_error(&err).map(|e| e.kind()) {
            error!(kind, "catalog import failed");
        }
        err
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ImportConfig::from_env();
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    let store = RecordStore::open(&config.database_url)
        .await
        .with_context(|| format!("opening store {}", config.database_url))?;

    let command = cli.command.unwrap_or(Commands::Serve {
        skip_import: false,
        from_file: None,
        port: None,
    });

    match command {
        Commands::Serve {
            skip_import,
            from_file,
            port,
        } => {
            let pipeline = Arc::new(ImportPipeline::new(config, store.clone())?);
            if skip_import {
                info!("skipping startup import");
            } else {
                // no data, no server
                run_import(&pipeline, from_file)
                    .await
                    .context("startup import failed")?;
            }

            let scheduler = Arc::clone(&pipeline).maybe_build_scheduler().await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting import scheduler")?;
                info!(cron = %pipeline.config().import_cron, "scheduled re-import enabled");
            }

            let web = WebConfig::from_env();
            let port = port.unwrap_or(web.port);
            dcat_web::serve(AppState::new(store, &web), port).await?;
        }
        Commands::Import { from_file } => {
            let pipeline = ImportPipeline::new(config, store)?;
            let summary = run_import(&pipeline, from_file).await?;
            println!(
                "import complete: batch_id={} source={} parsed={} unidentified={} stored={} policy={}",
                summary.batch_id,
                summary.source,
                summary.parsed_records,
                summary.unidentified_entries,
                summary.stored_records,
                summary.policy
            );
        }
        Commands::Migrate => {
            store.migrate().await.context("creating tables")?;
            println!("migrate complete: {}", config.database_url);
        }
    }

    Ok(())
}
