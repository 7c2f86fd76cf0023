//! CSV source adapters for the unit inventory and rent-roll exports.

use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "rentroll-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing file: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A row type read from one of the source exports.
pub trait SourceRow: DeserializeOwned + Serialize {
    /// File label used in logs and reports.
    const LABEL: &'static str;
    /// Header names the export is expected to carry.
    const COLUMNS: &'static [&'static str];

    /// Compact JSON rendering of the raw row, for diagnostics.
    fn to_log_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One line of the unit inventory export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnitCsvRow {
    pub facility_name: String,
    pub unit_number: String,
    /// `"WxLxH"`, e.g. `"10x12x12"`.
    pub unit_size: String,
    pub unit_type: String,
}

impl SourceRow for UnitCsvRow {
    const LABEL: &'static str = "unit.csv";
    const COLUMNS: &'static [&'static str] =
        &["facilityName", "unitNumber", "unitSize", "unitType"];
}

/// One line of the rent-roll export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RentRollRow {
    pub facility_name: String,
    pub unit_number: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub rent_start_date: String,
    pub rent_end_date: String,
    pub monthly_rent: String,
    pub current_rent_owed: String,
    pub current_rent_owed_due_date: String,
}

impl SourceRow for RentRollRow {
    const LABEL: &'static str = "rentRoll.csv";
    const COLUMNS: &'static [&'static str] = &[
        "facilityName",
        "unitNumber",
        "firstName",
        "lastName",
        "phone",
        "email",
        "rentStartDate",
        "rentEndDate",
        "monthlyRent",
        "currentRentOwed",
        "currentRentOwedDueDate",
    ];
}

/// A record that could not be read into a row, kept so the caller can log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// 1-based line in the export; the header is line 1.
    pub line: u64,
    pub reason: String,
    /// JSON array of the raw fields, empty when the record itself was unreadable.
    pub raw: String,
}

/// Parsed contents of one export, in source order.
#[derive(Debug, Clone)]
pub struct SourceFile<T> {
    pub path: PathBuf,
    pub sha256: String,
    pub rows: Vec<T>,
    /// Source line of each entry in `rows`.
    pub lines: Vec<u64>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> SourceFile<T> {
    /// Number of data records in the export, readable or not.
    pub fn record_count(&self) -> usize {
        self.rows.len() + self.rejected.len()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Reads a headered, comma-delimited export. Fields are trimmed, short records are
/// padded with empty fields and extra trailing fields are dropped. A record that
/// still cannot be read lands in `rejected` instead of failing the file.
pub fn read_source<T: SourceRow>(path: impl AsRef<Path>) -> Result<SourceFile<T>, IngestError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(IngestError::MissingFile {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let csv_err = |source| IngestError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes.as_slice());

    let headers = reader.headers().map_err(csv_err)?.clone();
    for column in T::COLUMNS {
        if !headers.iter().any(|h| h == *column) {
            warn!(file = T::LABEL, column, "expected column missing from header");
        }
    }

    let width = headers.len();
    let mut rows = Vec::new();
    let mut lines = Vec::new();
    let mut rejected = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let fallback_line = index as u64 + 2;
        let mut record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map_or(fallback_line, |pos| pos.line());
                warn!(file = T::LABEL, line, error = %err, "unreadable record");
                rejected.push(RejectedRecord {
                    line,
                    reason: err.to_string(),
                    raw: String::new(),
                });
                continue;
            }
        };
        let line = record.position().map_or(fallback_line, |pos| pos.line());
        if record.len() < width {
            debug!(file = T::LABEL, line, fields = record.len(), "short record padded");
            while record.len() < width {
                record.push_field("");
            }
        } else if record.len() > width {
            record.truncate(width);
        }

        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => {
                rows.push(row);
                lines.push(line);
            }
            Err(err) => {
                warn!(file = T::LABEL, line, error = %err, "record does not match header");
                let fields: Vec<&str> = record.iter().collect();
                rejected.push(RejectedRecord {
                    line,
                    reason: err.to_string(),
                    raw: serde_json::to_string(&fields).unwrap_or_default(),
                });
            }
        }
    }

    debug!(
        file = T::LABEL,
        rows = rows.len(),
        rejected = rejected.len(),
        path = %path.display(),
        "source file parsed"
    );

    Ok(SourceFile {
        path: path.to_path_buf(),
        sha256: sha256_hex(&bytes),
        rows,
        lines,
        rejected,
    })
}
