use super::{
    lock, BackendWriteError, FieldPath, InitRunOptions, ProjectRegistry, RegistryError, RunRow,
    RunsTable, SeriesPoint, TrackedRun, TrackedValue,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// File stored by `upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Contents of one run field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEntry {
    Series(Vec<SeriesPoint>),
    Value(TrackedValue),
    File(UploadedFile),
}

impl FieldEntry {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldEntry::Series(_) => "series",
            FieldEntry::Value(value) => value.kind_name(),
            FieldEntry::File(_) => "file",
        }
    }
}

/// Field store shared by the in-memory and local runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub id: String,
    pub custom_run_id: Option<String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub fields: BTreeMap<String, FieldEntry>,
    pub closed: bool,
}

impl RunState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    fn from_options(id: String, options: InitRunOptions) -> Self {
        Self {
            id,
            custom_run_id: Some(options.custom_run_id),
            name: options.name,
            hostname: options.hostname,
            ..Self::default()
        }
    }

    pub fn series(&self, path: &str) -> Option<&[SeriesPoint]> {
        match self.fields.get(path) {
            Some(FieldEntry::Series(points)) => Some(points),
            _ => None,
        }
    }

    pub fn value(&self, path: &str) -> Option<&TrackedValue> {
        match self.fields.get(path) {
            Some(FieldEntry::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn file(&self, path: &str) -> Option<&UploadedFile> {
        match self.fields.get(path) {
            Some(FieldEntry::File(file)) => Some(file),
            _ => None,
        }
    }

    pub fn field_paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = FieldPath::new(path);
        if path.as_str().is_empty() {
            return false;
        }
        if self.fields.contains_key(path.as_str()) {
            return true;
        }
        let prefix = format!("{path}/");
        self.fields
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    pub(crate) fn append(&mut self, path: &str, point: SeriesPoint) -> Result<(), BackendWriteError> {
        let key = self.writable_key(path)?;
        match self
            .fields
            .entry(key.clone())
            .or_insert_with(|| FieldEntry::Series(Vec::new()))
        {
            FieldEntry::Series(points) => {
                points.push(point);
                Ok(())
            }
            other => Err(BackendWriteError::TypeConflict {
                path: key,
                existing: other.kind_name(),
                operation: "append to",
            }),
        }
    }

    pub(crate) fn assign(&mut self, path: &str, value: TrackedValue) -> Result<(), BackendWriteError> {
        let key = self.writable_key(path)?;
        if let Some(FieldEntry::Series(_)) = self.fields.get(&key) {
            return Err(BackendWriteError::TypeConflict {
                path: key,
                existing: "series",
                operation: "assign",
            });
        }
        self.fields.insert(key, FieldEntry::Value(value));
        Ok(())
    }

    pub(crate) fn upload(&mut self, path: &str, file: &Path) -> Result<(), BackendWriteError> {
        let key = self.writable_key(path)?;
        let bytes = fs::read(file).map_err(|source| BackendWriteError::Upload {
            path: file.to_path_buf(),
            source,
        })?;
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        if let Some(FieldEntry::Series(_)) = self.fields.get(&key) {
            return Err(BackendWriteError::TypeConflict {
                path: key,
                existing: "series",
                operation: "upload to",
            });
        }
        self.fields
            .insert(key, FieldEntry::File(UploadedFile { name, bytes }));
        Ok(())
    }

    fn writable_key(&self, path: &str) -> Result<String, BackendWriteError> {
        if self.closed {
            return Err(BackendWriteError::Closed {
                run_id: self.id.clone(),
            });
        }
        let path = FieldPath::new(path);
        if path.as_str().is_empty() {
            return Err(BackendWriteError::EmptyPath);
        }
        Ok(path.as_str().to_string())
    }
}

/// Run kept entirely in memory. Clones share the same state, so a caller
/// can keep one clone for inspection while another is boxed as a
/// [`TrackedRun`].
#[derive(Debug, Clone)]
pub struct MemoryRun {
    id: String,
    state: Arc<Mutex<RunState>>,
}

impl MemoryRun {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            state: Arc::new(Mutex::new(RunState::new(id.clone()))),
            id,
        }
    }

    fn from_state(state: RunState) -> Self {
        Self {
            id: state.id.clone(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Copy of the run's current fields.
    pub fn snapshot(&self) -> RunState {
        lock(&self.state).clone()
    }
}

impl TrackedRun for MemoryRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn append(&mut self, path: &str, point: SeriesPoint) -> Result<(), BackendWriteError> {
        lock(&self.state).append(path, point)
    }

    fn assign(&mut self, path: &str, value: TrackedValue) -> Result<(), BackendWriteError> {
        lock(&self.state).assign(path, value)
    }

    fn upload(&mut self, path: &str, file: &Path) -> Result<(), BackendWriteError> {
        lock(&self.state).upload(path, file)
    }

    fn exists(&self, path: &str) -> bool {
        lock(&self.state).exists(path)
    }

    fn close(&mut self) -> Result<(), BackendWriteError> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

/// Project whose runs live in process memory (debug mode).
#[derive(Debug, Clone)]
pub struct MemoryProject {
    name: String,
    runs: Arc<Mutex<Vec<MemoryRun>>>,
}

impl MemoryProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn run_count(&self) -> usize {
        lock(&self.runs).len()
    }

    /// Snapshots of every run, in creation order.
    pub fn runs(&self) -> Vec<RunState> {
        lock(&self.runs).iter().map(MemoryRun::snapshot).collect()
    }

    pub fn run_by_custom_id(&self, custom_run_id: &str) -> Option<RunState> {
        self.runs()
            .into_iter()
            .find(|run| run.custom_run_id.as_deref() == Some(custom_run_id))
    }
}

impl ProjectRegistry for MemoryProject {
    fn project(&self) -> &str {
        &self.name
    }

    fn fetch_runs_table(&self) -> Result<RunsTable, RegistryError> {
        let rows = self
            .runs()
            .into_iter()
            .map(|run| RunRow {
                id: run.id,
                custom_run_id: run.custom_run_id,
                name: run.name,
            })
            .collect();
        Ok(RunsTable::new(rows))
    }

    fn init_run(&mut self, options: InitRunOptions) -> Result<Box<dyn TrackedRun>, RegistryError> {
        let mut runs = lock(&self.runs);
        let taken = runs
            .iter()
            .any(|run| lock(&run.state).custom_run_id.as_deref() == Some(options.custom_run_id.as_str()));
        if taken {
            return Err(RegistryError::DuplicateRun {
                custom_run_id: options.custom_run_id,
            });
        }
        let id = format!("TB-{}", runs.len() + 1);
        let run = MemoryRun::from_state(RunState::from_options(id, options));
        runs.push(run.clone());
        Ok(Box::new(run))
    }
}
