use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Synced,
    AlreadySynced,
    Skipped,
    Failed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Synced => "synced",
            FileStatus::AlreadySynced => "already_synced",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one visited file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub records_read: u64,
    pub records_evicted: u64,
    pub values_written: u64,
    pub values_dropped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileOutcome {
    pub fn new(path: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
            custom_run_id: None,
            run_id: None,
            records_read: 0,
            records_evicted: 0,
            values_written: 0,
            values_dropped: 0,
            reason: None,
        }
    }

    pub fn with_custom_run_id(mut self, custom_run_id: impl Into<String>) -> Self {
        self.custom_run_id = Some(custom_run_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialize report line: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Outcomes of one traversal, in visit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    outcomes: Vec<FileOutcome>,
}

impl SyncReport {
    pub fn push(&mut self, outcome: FileOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn synced(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == FileStatus::Synced)
    }

    /// One JSON object per outcome.
    pub fn to_json_lines(&self) -> Result<Vec<String>, ReportError> {
        self.outcomes
            .iter()
            .map(|outcome| serde_json::to_string(outcome).map_err(ReportError::from))
            .collect()
    }

    pub fn write_json_lines(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        let write_err = |source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut output = BufWriter::new(File::create(path).map_err(write_err)?);
        for line in self.to_json_lines()? {
            writeln!(output, "{line}").map_err(write_err)?;
        }
        output.flush().map_err(write_err)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} already synced, {} skipped, {} failed",
            self.count(FileStatus::Synced),
            self.count(FileStatus::AlreadySynced),
            self.count(FileStatus::Skipped),
            self.count(FileStatus::Failed)
        )
    }
}
