//! Batch import of event files found under a directory.

pub mod path;
pub mod report;

pub use path::{custom_run_id, hostname, run_name, CUSTOM_RUN_ID_LEN, UNTITLED_RUN_NAME};
pub use report::{FileOutcome, FileStatus, ReportError, SyncReport};

use crate::adapter::{RunWrite, ValueAdapter};
use crate::backend::{
    BackendWriteError, InitRunOptions, ProjectRegistry, RegistryError, TrackedRun, TrackedValue,
};
use crate::event_file::{
    first_event_timestamp, DecodeError, DecodedValue, EventFileReader, FileReadError,
};
use crate::summary::{ChannelLimits, ConfigurationError, RetentionBuffer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Run field holding the source event file path.
pub const TENSORBOARD_PATH_FIELD: &str = "tensorboard_path";

/// Failure while importing one file; logged and recorded, never propagated.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot list existing runs: {0}")]
    RunsTable(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Read(#[from] FileReadError),
    #[error("event stream is corrupt: {0}")]
    Stream(#[from] DecodeError),
    #[error("failed to finalize run: {0}")]
    Close(#[from] BackendWriteError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Walks a directory and replays each new event file into its own run.
pub struct RunExporter<P: ProjectRegistry> {
    registry: P,
    limits: ChannelLimits,
    adapter: ValueAdapter,
    seed: Option<u64>,
}

impl<P: ProjectRegistry> RunExporter<P> {
    /// Fails when `limits` holds a negative capacity.
    pub fn new(registry: P, limits: ChannelLimits) -> Result<Self, ConfigurationError> {
        limits.validate()?;
        Ok(Self {
            registry,
            limits,
            adapter: ValueAdapter::default(),
            seed: None,
        })
    }

    pub fn with_adapter(mut self, adapter: ValueAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Seeds every file's eviction sampler with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn registry(&self) -> &P {
        &self.registry
    }

    pub fn into_registry(self) -> P {
        self.registry
    }

    /// Imports every file under `root`, sorted by file name, one at a time.
    pub fn run(&mut self, root: &Path) -> SyncReport {
        let mut known = self
            .registry
            .fetch_runs_table()
            .map(|table| table.custom_run_ids())
            .map_err(|err| err.to_string());
        if let Err(reason) = &known {
            warn!(project = self.registry.project(), error = %reason, "cannot list existing runs");
        }

        let mut report = SyncReport::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).to_path_buf();
                    warn!(path = %path.display(), error = %err, "cannot read directory entry");
                    report.push(FileOutcome::new(path, FileStatus::Failed).with_reason(err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            report.push(self.sync_file(root, entry.path(), &mut known));
        }
        info!(root = %root.display(), summary = %report, "sync finished");
        report
    }

    fn sync_file(
        &mut self,
        root: &Path,
        path: &Path,
        known: &mut Result<BTreeSet<String>, String>,
    ) -> FileOutcome {
        if let Err(err) = first_event_timestamp(path) {
            debug!(path = %path.display(), reason = %err, "skipping file that is not an event file");
            return FileOutcome::new(path, FileStatus::Skipped).with_reason(err.to_string());
        }
        let custom_run_id = custom_run_id(path);
        let outcome = FileOutcome::new(path, FileStatus::Synced).with_custom_run_id(&custom_run_id);
        let known = match known {
            Ok(known) => known,
            Err(reason) => {
                let err = ExportError::RunsTable(reason.clone());
                warn!(path = %path.display(), error = %err, "cannot load run from file");
                return FileOutcome {
                    status: FileStatus::Failed,
                    reason: Some(err.to_string()),
                    ..outcome
                };
            }
        };
        if known.contains(&custom_run_id) {
            info!(path = %path.display(), "already synced");
            return FileOutcome {
                status: FileStatus::AlreadySynced,
                ..outcome
            };
        }
        let mut outcome = outcome;
        match self.import(root, path, known, &mut outcome) {
            Ok(()) => {
                info!(
                    path = %path.display(),
                    run_id = outcome.run_id.as_deref().unwrap_or_default(),
                    custom_run_id = %custom_run_id,
                    "exported"
                );
                outcome
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot load run from file");
                FileOutcome {
                    status: FileStatus::Failed,
                    reason: Some(err.to_string()),
                    ..outcome
                }
            }
        }
    }

    fn import(
        &mut self,
        root: &Path,
        path: &Path,
        known: &mut BTreeSet<String>,
        outcome: &mut FileOutcome,
    ) -> Result<(), ExportError> {
        let custom_run_id = custom_run_id(path);
        let relative = path.strip_prefix(root).unwrap_or(path);
        let mut run = self.registry.init_run(InitRunOptions {
            custom_run_id: custom_run_id.clone(),
            name: Some(run_name(relative)),
            hostname: hostname(path),
        })?;
        known.insert(custom_run_id);
        outcome.run_id = Some(run.id().to_string());

        let replayed = self.replay(run.as_mut(), path, relative, outcome);
        let closed = run.close();
        replayed?;
        closed?;
        Ok(())
    }

    fn replay(
        &self,
        run: &mut dyn TrackedRun,
        path: &Path,
        relative: &Path,
        outcome: &mut FileOutcome,
    ) -> Result<(), ExportError> {
        let mut header = vec![
            RunWrite::Assign {
                path: TENSORBOARD_PATH_FIELD.to_string(),
                value: TrackedValue::Text(path.display().to_string()),
            },
            RunWrite::Assign {
                path: self.adapter.namespace().join("run_name").to_string(),
                value: TrackedValue::Text(run_name(relative)),
            },
        ];
        if let Some(host) = hostname(path) {
            header.push(RunWrite::Assign {
                path: self.adapter.namespace().join("hostname").to_string(),
                value: TrackedValue::Text(host),
            });
        }
        let mut forwarded = self.adapter.apply(run, header);

        let mut buffer = self.buffer()?;
        let mut broken = None;
        for value in EventFileReader::open(path)?.values() {
            match value {
                Ok(DecodedValue::Record(record)) => {
                    outcome.records_read += 1;
                    buffer.insert(record);
                }
                Ok(DecodedValue::Hparams(set)) => {
                    forwarded += self.adapter.forward_hparams(run, &set);
                }
                Err(err) if err.is_stream_error() => {
                    broken = Some(err);
                    break;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "dropping undecodable value");
                    forwarded.dropped += 1;
                }
            }
        }
        outcome.records_evicted = buffer.evicted_total() + buffer.dropped_total();

        // Whatever was read before a corrupt record is still delivered.
        for (_, record) in buffer.flush_in_order() {
            forwarded += self.adapter.forward(run, &record);
        }
        outcome.values_written = forwarded.written;
        outcome.values_dropped = forwarded.dropped;
        match broken {
            Some(err) => Err(ExportError::Stream(err)),
            None => Ok(()),
        }
    }

    fn buffer(&self) -> Result<RetentionBuffer, ConfigurationError> {
        match self.seed {
            Some(seed) => {
                RetentionBuffer::with_rng(self.limits, Box::new(ChaCha8Rng::seed_from_u64(seed)))
            }
            None => RetentionBuffer::new(self.limits),
        }
    }
}
