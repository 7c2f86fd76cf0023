//! Append-only diagnostic log of skipped rows and failed files.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rentroll_core::to_iso;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Writes `[<timestamp>] <file> <reason>: <detail>` lines. Recording never fails the
/// import; write errors are only reported through tracing.
#[derive(Debug, Clone)]
pub struct SkipLog {
    path: PathBuf,
}

impl SkipLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, file: &str, reason: &str, detail: &str) {
        let line = format!("[{}] {file} {reason}: {detail}\n", to_iso(Utc::now()));
        if let Err(err) = self.append(&line).await {
            warn!(path = %self.path.display(), error = %err, "could not write skip log");
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
