//! Import pipeline: the unit inventory first, then the rent roll, each file in its own
//! transaction.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rentroll_ingest::{
    read_source, IngestError, RentRollRow, SourceFile, SourceRow, UnitCsvRow,
};
use rentroll_storage::{ImportSession, PgStore, Store, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod reconcile;
pub mod skip_log;
pub mod transaction;

pub use reconcile::{
    reconcile_rent_roll_row, reconcile_unit_row, recompute_balance, upsert, FacilityCache,
    RowError, RowSkip, Upsert, Upsertable,
};
pub use skip_log::SkipLog;
pub use transaction::{FileTransaction, TransactionState};

pub const CRATE_NAME: &str = "rentroll-sync";

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub data_folder_name: String,
    pub unit_file_name: String,
    pub rent_roll_file_name: String,
    pub error_log: PathBuf,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                or("DB_USER", "monument"),
                or("DB_PASS", "monument123"),
                or("DB_HOST", "localhost"),
                or("DB_PORT", "5437"),
                or("DB_NAME", "monument"),
            )
        });

        Self {
            database_url,
            data_dir: PathBuf::from(or("DATA_DIR", "./data")),
            data_folder_name: or("DATA_FOLDER_NAME", "client1_health"),
            unit_file_name: or("UNIT_FILE_NAME", "unit.csv"),
            rent_roll_file_name: or("RENT_ROLL_FILE_NAME", "rentRoll.csv"),
            error_log: PathBuf::from(or("MIGRATION_ERROR_LOG", "logs/migration-errors.log")),
        }
    }

    pub fn data_folder(&self) -> PathBuf {
        self.data_dir.join(&self.data_folder_name)
    }

    pub fn unit_file_path(&self) -> PathBuf {
        self.data_folder().join(&self.unit_file_name)
    }

    pub fn rent_roll_file_path(&self) -> PathBuf {
        self.data_folder().join(&self.rent_roll_file_name)
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{file}: {source}")]
    Ingest {
        file: &'static str,
        #[source]
        source: IngestError,
    },
    #[error("{file}: import rolled back: {source}")]
    Store {
        file: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Counters for one committed unit-inventory pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitImportReport {
    pub run_id: Uuid,
    pub source_sha256: String,
    pub rows: usize,
    pub facilities_created: usize,
    pub units_created: usize,
    pub units_updated: usize,
    pub units_unchanged: usize,
    pub skipped: usize,
}

/// Counters for one committed rent-roll pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RentRollImportReport {
    pub run_id: Uuid,
    pub source_sha256: String,
    pub rows: usize,
    pub tenants_created: usize,
    pub tenants_updated: usize,
    pub contracts_created: usize,
    pub contracts_updated: usize,
    pub invoices_created: usize,
    pub invoices_updated: usize,
    pub unit_rents_updated: usize,
    pub facility_mismatches: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: UnitImportReport,
    pub rent_roll: RentRollImportReport,
}

pub struct ImportPipeline {
    config: ImportConfig,
    store: Arc<dyn Store>,
    skip_log: SkipLog,
}

impl ImportPipeline {
    pub fn new(config: ImportConfig, store: Arc<dyn Store>) -> Self {
        let skip_log = SkipLog::new(config.error_log.clone());
        Self {
            config,
            store,
            skip_log,
        }
    }

    /// Units, then the rent roll. Stops at the first file that fails; a file that
    /// committed stays committed.
    pub async fn run_full_import(&self) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let units = self
            .units_pass(run_id)
            .await
            .context("unit inventory import failed")?;
        let rent_roll = self
            .rent_roll_pass(run_id)
            .await
            .context("rent-roll import failed")?;

        Ok(ImportSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            units,
            rent_roll,
        })
    }

    pub async fn import_units(&self) -> Result<UnitImportReport, ImportError> {
        self.units_pass(Uuid::new_v4()).await
    }

    pub async fn import_rent_roll(&self) -> Result<RentRollImportReport, ImportError> {
        self.rent_roll_pass(Uuid::new_v4()).await
    }

    async fn units_pass(&self, run_id: Uuid) -> Result<UnitImportReport, ImportError> {
        let label = UnitCsvRow::LABEL;
        let span = info_span!("import_file", %run_id, file = label);
        async move {
            let source = self.load::<UnitCsvRow>(self.config.unit_file_path()).await?;
            let mut report = UnitImportReport {
                run_id,
                source_sha256: source.sha256.clone(),
                rows: source.record_count(),
                skipped: source.rejected.len(),
                ..Default::default()
            };
            self.record_rejected(&source).await;

            let mut tx = self.begin(label).await?;
            let outcome = self
                .reconcile_units(tx.session(), &source, &mut report)
                .await;
            self.finish(tx, label, outcome).await?;

            info!(
                facilities_created = report.facilities_created,
                units_created = report.units_created,
                units_updated = report.units_updated,
                skipped = report.skipped,
                "unit inventory committed"
            );
            Ok::<_, ImportError>(report)
        }
        .instrument(span)
        .await
    }

    async fn rent_roll_pass(&self, run_id: Uuid) -> Result<RentRollImportReport, ImportError> {
        let label = RentRollRow::LABEL;
        let span = info_span!("import_file", %run_id, file = label);
        async move {
            let source = self
                .load::<RentRollRow>(self.config.rent_roll_file_path())
                .await?;
            let mut report = RentRollImportReport {
                run_id,
                source_sha256: source.sha256.clone(),
                rows: source.record_count(),
                skipped: source.rejected.len(),
                ..Default::default()
            };
            self.record_rejected(&source).await;

            let mut tx = self.begin(label).await?;
            let outcome = self
                .reconcile_rent_roll(tx.session(), &source, &mut report)
                .await;
            self.finish(tx, label, outcome).await?;

            info!(
                tenants_created = report.tenants_created,
                contracts_created = report.contracts_created,
                invoices_created = report.invoices_created,
                invoices_updated = report.invoices_updated,
                skipped = report.skipped,
                "rent roll committed"
            );
            Ok::<_, ImportError>(report)
        }
        .instrument(span)
        .await
    }

    async fn reconcile_units(
        &self,
        session: &mut dyn ImportSession,
        source: &SourceFile<UnitCsvRow>,
        report: &mut UnitImportReport,
    ) -> Result<(), StoreError> {
        let mut cache = FacilityCache::new();
        for (row, &line) in source.rows.iter().zip(&source.lines) {
            match reconcile_unit_row(session, &mut cache, row, report).await {
                Ok(()) => {}
                Err(RowError::Skip(skip)) => {
                    report.skipped += 1;
                    self.record_skip::<UnitCsvRow>(line, &skip, &row.to_log_json()).await;
                }
                Err(RowError::Store(err)) => return Err(err),
            }
        }
        Ok(())
    }

    async fn reconcile_rent_roll(
        &self,
        session: &mut dyn ImportSession,
        source: &SourceFile<RentRollRow>,
        report: &mut RentRollImportReport,
    ) -> Result<(), StoreError> {
        for (row, &line) in source.rows.iter().zip(&source.lines) {
            match reconcile_rent_roll_row(session, row, report).await {
                Ok(()) => {}
                Err(RowError::Skip(skip)) => {
                    report.skipped += 1;
                    self.record_skip::<RentRollRow>(line, &skip, &row.to_log_json()).await;
                }
                Err(RowError::Store(err)) => return Err(err),
            }
        }
        Ok(())
    }

    async fn load<T: SourceRow>(&self, path: PathBuf) -> Result<SourceFile<T>, ImportError> {
        match read_source::<T>(&path) {
            Ok(source) => {
                info!(
                    rows = source.rows.len(),
                    rejected = source.rejected.len(),
                    sha256 = %source.sha256,
                    "source loaded"
                );
                Ok(source)
            }
            Err(source) => {
                error!(error = %source, "source unavailable; nothing imported");
                self.skip_log
                    .record(T::LABEL, "import failed", &source.to_string())
                    .await;
                Err(ImportError::Ingest {
                    file: T::LABEL,
                    source,
                })
            }
        }
    }

    async fn begin(&self, label: &'static str) -> Result<FileTransaction, ImportError> {
        FileTransaction::begin(self.store.as_ref(), label)
            .await
            .map_err(|source| ImportError::Store {
                file: label,
                source,
            })
    }

    async fn finish(
        &self,
        tx: FileTransaction,
        label: &'static str,
        outcome: Result<(), StoreError>,
    ) -> Result<(), ImportError> {
        let (state, result) = tx.finish(outcome).await;
        if let Err(source) = result {
            error!(error = %source, ?state, "transaction rolled back");
            self.skip_log
                .record(label, "transaction rolled back", &source.to_string())
                .await;
            return Err(ImportError::Store {
                file: label,
                source,
            });
        }
        Ok(())
    }

    /// Records that never became rows are skipped before the transaction opens.
    async fn record_rejected<R: SourceRow>(&self, source: &SourceFile<R>) {
        for rejected in &source.rejected {
            let skip = RowSkip::Unreadable(rejected.reason.clone());
            self.record_skip::<R>(rejected.line, &skip, &rejected.raw).await;
        }
    }

    async fn record_skip<R: SourceRow>(&self, line: u64, skip: &RowSkip, detail: &str) {
        match skip {
            RowSkip::UnitNotFound { .. } => {
                warn!(line, reason = %skip, "rent-roll row has no unit")
            }
            _ => warn!(line, reason = %skip, "row skipped"),
        }
        self.skip_log.record(R::LABEL, &skip.to_string(), detail).await;
    }
}

/// Pipeline over PostgreSQL for the given configuration.
pub async fn connect_pipeline(config: ImportConfig) -> Result<ImportPipeline> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    Ok(ImportPipeline::new(config, Arc::new(store)))
}
