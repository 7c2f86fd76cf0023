use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rentroll_storage::{MemoryStore, PgStore};
use rentroll_sync::{
    connect_pipeline, ImportConfig, ImportPipeline, RentRollImportReport, UnitImportReport,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rentroll-cli")]
#[command(about = "Imports unit inventory and rent-roll exports")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data folder under DATA_DIR holding the two exports.
    #[arg(long, global = true)]
    data_folder: Option<String>,

    /// Where skipped rows and failed files are recorded.
    #[arg(long, global = true)]
    error_log: Option<PathBuf>,

    /// Run against a throwaway in-memory store instead of PostgreSQL.
    #[arg(long, global = true)]
    in_memory: bool,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Unit inventory, then rent roll.
    Import,
    Units,
    RentRoll,
    /// Apply the embedded schema migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ImportConfig::from_env();
    if let Some(folder) = cli.data_folder.clone() {
        config.data_folder_name = folder;
    }
    if let Some(path) = cli.error_log.clone() {
        config.error_log = path;
    }

    let command = cli.command.unwrap_or(Commands::Import);
    if let Commands::Migrate = command {
        let store = PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?;
        store.migrate().await.context("applying migrations")?;
        println!("migrations applied");
        return Ok(());
    }

    let pipeline = if cli.in_memory {
        info!("using in-memory store; nothing will be persisted");
        ImportPipeline::new(config, Arc::new(MemoryStore::new()))
    } else {
        connect_pipeline(config).await?
    };

    match command {
        Commands::Import => {
            let summary = pipeline.run_full_import().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "import complete: run_id={} started_at={} finished_at={}",
                    summary.run_id, summary.started_at, summary.finished_at
                );
                print_units(&summary.units);
                print_rent_roll(&summary.rent_roll);
            }
        }
        Commands::Units => {
            let report = pipeline.import_units().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_units(&report);
            }
        }
        Commands::RentRoll => {
            let report = pipeline.import_rent_roll().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_rent_roll(&report);
            }
        }
        Commands::Migrate => {}
    }

    Ok(())
}

fn print_units(report: &UnitImportReport) {
    println!(
        "unit.csv: rows={} facilities_created={} units_created={} units_updated={} \
         skipped={} sha256={}",
        report.rows,
        report.facilities_created,
        report.units_created,
        report.units_updated,
        report.skipped,
        report.source_sha256
    );
}

fn print_rent_roll(report: &RentRollImportReport) {
    println!(
        "rentRoll.csv: rows={} tenants={}/{} contracts={}/{} invoices={}/{} \
         unit_rents_updated={} facility_mismatches={} skipped={} sha256={}",
        report.rows,
        report.tenants_created,
        report.tenants_updated,
        report.contracts_created,
        report.contracts_updated,
        report.invoices_created,
        report.invoices_updated,
        report.unit_rents_updated,
        report.facility_mismatches,
        report.skipped,
        report.source_sha256
    );
}
