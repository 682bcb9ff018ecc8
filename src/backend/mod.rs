//! Tracked-run and project-registry interfaces plus the bundled backends.
//!
//! The tracking service itself is external; [`MemoryProject`] keeps runs in
//! process (debug mode) and [`LocalProject`] persists them under a storage
//! directory so the CLI can be used without a service.

pub mod local;
pub mod memory;

pub use local::{LocalProject, LocalRun, RUN_MANIFEST};
pub use memory::{FieldEntry, MemoryProject, MemoryRun, RunState, UploadedFile};

use image::{DynamicImage, ImageOutputFormat};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Locks `mutex`, recovering the data if a writer panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Field path inside a run, segments joined with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(root: impl AsRef<str>) -> Self {
        Self(normalize(root.as_ref()))
    }

    /// Appends `segment`, which may itself contain `/`.
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        let segment = normalize(segment.as_ref());
        match (self.0.is_empty(), segment.is_empty()) {
            (_, true) => self.clone(),
            (true, false) => Self(segment),
            (false, false) => Self(format!("{}/{}", self.0, segment)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(raw: &str) -> String {
    raw.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// In-memory bitmap destined for an image series or field.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageArtifact {
    bitmap: DynamicImage,
}

impl ImageArtifact {
    pub fn from_bitmap(bitmap: DynamicImage) -> Self {
        Self { bitmap }
    }

    /// Decodes PNG (or any enabled format) bytes into a bitmap.
    pub fn decode(encoded: &[u8]) -> Result<Self, image::ImageError> {
        image::load_from_memory(encoded).map(Self::from_bitmap)
    }

    pub fn bitmap(&self) -> &DynamicImage {
        &self.bitmap
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());
        self.bitmap.write_to(&mut out, ImageOutputFormat::Png)?;
        Ok(out.into_inner())
    }
}

/// Value written to a run field or appended to a series.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedValue {
    Float(f64),
    Text(String),
    Bool(bool),
    Image(ImageArtifact),
}

impl TrackedValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TrackedValue::Float(_) => "float",
            TrackedValue::Text(_) => "string",
            TrackedValue::Bool(_) => "bool",
            TrackedValue::Image(_) => "image",
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TrackedValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TrackedValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// One appended series entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub value: TrackedValue,
    pub step: Option<f64>,
    pub timestamp: Option<f64>,
}

impl SeriesPoint {
    pub fn new(value: TrackedValue) -> Self {
        Self {
            value,
            step: None,
            timestamp: None,
        }
    }

    pub fn with_step(mut self, step: Option<f64>) -> Self {
        self.step = step;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<f64>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Failure of one write against a run.
#[derive(Debug, Error)]
pub enum BackendWriteError {
    #[error("run {run_id} is already closed")]
    Closed { run_id: String },
    #[error("field {path} holds a {existing}; cannot {operation} it")]
    TypeConflict {
        path: String,
        existing: &'static str,
        operation: &'static str,
    },
    #[error("empty field path")]
    EmptyPath,
    #[error("failed to read upload {path}: {source}")]
    Upload {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to persist run {run_id}: {reason}")]
    Persist { run_id: String, reason: String },
}

/// Failure of a project-level operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid project name {0:?}")]
    InvalidProject(String),
    #[error("api token must not be empty")]
    EmptyApiToken,
    #[error("storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("run {custom_run_id} already exists")]
    DuplicateRun { custom_run_id: String },
    #[error(transparent)]
    Run(#[from] BackendWriteError),
}

/// Handle to one tracked run.
pub trait TrackedRun: Send {
    /// Identifier assigned by the backend.
    fn id(&self) -> &str;
    /// `run[path].append(value)`.
    fn append(&mut self, path: &str, point: SeriesPoint) -> Result<(), BackendWriteError>;
    /// `run[path] = value`.
    fn assign(&mut self, path: &str, value: TrackedValue) -> Result<(), BackendWriteError>;
    /// `run[path].upload(file)`; the file is read before returning.
    fn upload(&mut self, path: &str, file: &Path) -> Result<(), BackendWriteError>;
    /// True when `path` is a field or a namespace containing fields.
    fn exists(&self, path: &str) -> bool;
    /// Finalizes the run; later writes fail with [`BackendWriteError::Closed`].
    fn close(&mut self) -> Result<(), BackendWriteError>;
}

/// Options used when creating a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitRunOptions {
    pub custom_run_id: String,
    pub name: Option<String>,
    pub hostname: Option<String>,
}

/// One row of the runs listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub id: String,
    pub custom_run_id: Option<String>,
    pub name: Option<String>,
}

/// Tabular listing of a project's runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunsTable {
    rows: Vec<RunRow>,
}

impl RunsTable {
    pub fn new(rows: Vec<RunRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[RunRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The custom-id column; rows without one are skipped.
    pub fn custom_run_ids(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .filter_map(|row| row.custom_run_id.clone())
            .collect()
    }
}

/// Project-level operations needed by the exporter.
pub trait ProjectRegistry {
    fn project(&self) -> &str;
    fn fetch_runs_table(&self) -> Result<RunsTable, RegistryError>;
    fn init_run(&mut self, options: InitRunOptions) -> Result<Box<dyn TrackedRun>, RegistryError>;
}
