use super::memory::{FieldEntry, RunState};
use super::{
    BackendWriteError, InitRunOptions, ProjectRegistry, RegistryError, RunRow, RunsTable,
    SeriesPoint, TrackedRun, TrackedValue,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Manifest written into every run directory.
pub const RUN_MANIFEST: &str = "run.json";

const FILES_DIR: &str = "files";

/// Project persisted as `<storage>/<project>/<run id>/run.json`.
#[derive(Debug, Clone)]
pub struct LocalProject {
    name: String,
    root: PathBuf,
}

impl LocalProject {
    pub fn open(
        storage: impl AsRef<Path>,
        project: &str,
        api_token: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let project = project.trim();
        if project.is_empty() || project.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(RegistryError::InvalidProject(project.to_string()));
        }
        if api_token.is_some_and(|token| token.trim().is_empty()) {
            return Err(RegistryError::EmptyApiToken);
        }
        let root = storage.as_ref().join(project.replace('/', "__"));
        fs::create_dir_all(&root).map_err(|source| RegistryError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            name: project.to_string(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_manifests(&self) -> Result<Vec<(PathBuf, RunHeader)>, RegistryError> {
        let entries = fs::read_dir(&self.root).map_err(|source| RegistryError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RegistryError::Io {
                path: self.root.clone(),
                source,
            })?;
            let manifest = entry.path().join(RUN_MANIFEST);
            let Ok(raw) = fs::read(&manifest) else {
                continue;
            };
            match serde_json::from_slice::<RunHeader>(&raw) {
                Ok(header) => manifests.push((entry.path(), header)),
                Err(err) => debug!(path = %manifest.display(), error = %err, "ignoring unreadable run manifest"),
            }
        }
        manifests.sort_by(|left, right| left.0.cmp(&right.0));
        Ok(manifests)
    }

    fn next_run_id(&self) -> Result<String, RegistryError> {
        let mut ordinal = fs::read_dir(&self.root)
            .map_err(|source| RegistryError::Io {
                path: self.root.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .count()
            + 1;
        loop {
            let candidate = format!("TB-{ordinal}");
            if !self.root.join(&candidate).exists() {
                return Ok(candidate);
            }
            ordinal += 1;
        }
    }
}

impl ProjectRegistry for LocalProject {
    fn project(&self) -> &str {
        &self.name
    }

    fn fetch_runs_table(&self) -> Result<RunsTable, RegistryError> {
        let rows = self
            .read_manifests()?
            .into_iter()
            .map(|(_, header)| RunRow {
                id: header.id,
                custom_run_id: header.custom_run_id,
                name: header.name,
            })
            .collect();
        Ok(RunsTable::new(rows))
    }

    fn init_run(&mut self, options: InitRunOptions) -> Result<Box<dyn TrackedRun>, RegistryError> {
        let taken = self
            .read_manifests()?
            .iter()
            .any(|(_, header)| header.custom_run_id.as_deref() == Some(options.custom_run_id.as_str()));
        if taken {
            return Err(RegistryError::DuplicateRun {
                custom_run_id: options.custom_run_id,
            });
        }
        let id = self.next_run_id()?;
        let dir = self.root.join(&id);
        fs::create_dir_all(&dir).map_err(|source| RegistryError::Io {
            path: dir.clone(),
            source,
        })?;
        let state = RunState {
            id,
            custom_run_id: Some(options.custom_run_id),
            name: options.name,
            hostname: options.hostname,
            ..RunState::default()
        };
        let run = LocalRun { dir, state };
        // Written at creation so the run is listed before it closes.
        run.persist()?;
        Ok(Box::new(run))
    }
}

/// Run buffered in memory and written to its directory on `close`.
#[derive(Debug)]
pub struct LocalRun {
    dir: PathBuf,
    state: RunState,
}

impl LocalRun {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn persist(&self) -> Result<(), BackendWriteError> {
        let persist_err = |reason: String| BackendWriteError::Persist {
            run_id: self.state.id.clone(),
            reason,
        };
        let mut fields = BTreeMap::new();
        for (path, entry) in &self.state.fields {
            let stored = match entry {
                FieldEntry::Series(points) => StoredField::Series(
                    points
                        .iter()
                        .enumerate()
                        .map(|(index, point)| {
                            Ok(StoredPoint {
                                value: self.store_value(path, Some(index), &point.value)?,
                                step: point.step,
                                timestamp: point.timestamp,
                            })
                        })
                        .collect::<Result<_, BackendWriteError>>()?,
                ),
                FieldEntry::Value(value) => StoredField::Value(self.store_value(path, None, value)?),
                FieldEntry::File(file) => {
                    let relative = artifact_path(path, &file.name);
                    self.write_artifact(&relative, &file.bytes)?;
                    StoredField::File(relative)
                }
            };
            fields.insert(path.clone(), stored);
        }
        let manifest = RunManifest {
            header: RunHeader {
                id: self.state.id.clone(),
                custom_run_id: self.state.custom_run_id.clone(),
                name: self.state.name.clone(),
                hostname: self.state.hostname.clone(),
            },
            closed: self.state.closed,
            fields,
        };
        let encoded =
            serde_json::to_vec_pretty(&manifest).map_err(|err| persist_err(err.to_string()))?;
        fs::write(self.dir.join(RUN_MANIFEST), encoded).map_err(|err| persist_err(err.to_string()))
    }

    fn store_value(
        &self,
        path: &str,
        index: Option<usize>,
        value: &TrackedValue,
    ) -> Result<StoredValue, BackendWriteError> {
        Ok(match value {
            TrackedValue::Float(value) => StoredValue::Float(*value),
            TrackedValue::Text(value) => StoredValue::Text(value.clone()),
            TrackedValue::Bool(value) => StoredValue::Bool(*value),
            TrackedValue::Image(artifact) => {
                let png = artifact.to_png().map_err(|err| BackendWriteError::Persist {
                    run_id: self.state.id.clone(),
                    reason: format!("{path}: {err}"),
                })?;
                let name = match index {
                    Some(index) => format!("{index}.png"),
                    None => "value.png".to_string(),
                };
                let relative = artifact_path(path, &name);
                self.write_artifact(&relative, &png)?;
                StoredValue::Image { image: relative }
            }
        })
    }

    fn write_artifact(&self, relative: &str, bytes: &[u8]) -> Result<(), BackendWriteError> {
        let contained = Path::new(relative)
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        let target = self.dir.join(relative);
        if !contained || !target.starts_with(&self.dir) {
            return Err(BackendWriteError::Persist {
                run_id: self.state.id.clone(),
                reason: format!("artifact path {relative} escapes the run directory"),
            });
        }
        let result = match target.parent() {
            Some(parent) => fs::create_dir_all(parent).and_then(|_| fs::write(&target, bytes)),
            None => fs::write(&target, bytes),
        };
        result.map_err(|err| BackendWriteError::Persist {
            run_id: self.state.id.clone(),
            reason: format!("{}: {err}", target.display()),
        })
    }
}

fn artifact_path(field: &str, name: &str) -> String {
    let mut segments: Vec<String> = field
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize_segment)
        .collect();
    segments.push(sanitize_segment(name));
    format!("{FILES_DIR}/{}", segments.join("/"))
}

/// Keeps one path component inside its parent directory.
fn sanitize_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".repeat(segment.len());
    }
    segment
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
            _ => '_',
        })
        .collect()
}

impl TrackedRun for LocalRun {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn append(&mut self, path: &str, point: SeriesPoint) -> Result<(), BackendWriteError> {
        self.state.append(path, point)
    }

    fn assign(&mut self, path: &str, value: TrackedValue) -> Result<(), BackendWriteError> {
        self.state.assign(path, value)
    }

    fn upload(&mut self, path: &str, file: &Path) -> Result<(), BackendWriteError> {
        self.state.upload(path, file)
    }

    fn exists(&self, path: &str) -> bool {
        self.state.exists(path)
    }

    fn close(&mut self) -> Result<(), BackendWriteError> {
        if self.state.closed {
            return Ok(());
        }
        self.state.closed = true;
        self.persist()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RunHeader {
    id: String,
    #[serde(default)]
    custom_run_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunManifest {
    #[serde(flatten)]
    header: RunHeader,
    closed: bool,
    fields: BTreeMap<String, StoredField>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum StoredField {
    Series(Vec<StoredPoint>),
    Value(StoredValue),
    File(String),
}

#[derive(Debug, Serialize)]
struct StoredPoint {
    value: StoredValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StoredValue {
    Float(f64),
    Text(String),
    Bool(bool),
    Image { image: String },
}
