//! Bridges TensorBoard summaries into experiment-tracking runs, either live
//! through summary-writer hooks or in batch from event files on disk.

pub mod adapter;
pub mod app;
pub mod backend;
pub mod config;
pub mod event_file;
pub mod export;
pub mod hooks;
pub mod logging;
pub mod summary;

pub use adapter::{
    BatchLayout, ForwardOutcome, GraphCache, GraphError, GraphRenderer, GraphUpload,
    GraphvizRenderer, ImageLayout, ImageTensor, ImageTensorError, ModelGraph, PixelData, RunWrite,
    ValueAdapter, DEFAULT_NAMESPACE,
};
pub use backend::{
    BackendWriteError, FieldEntry, FieldPath, ImageArtifact, InitRunOptions, LocalProject,
    LocalRun, MemoryProject, MemoryRun, ProjectRegistry, RegistryError, RunRow, RunState,
    RunsTable, SeriesPoint, TrackedRun, TrackedValue,
};
pub use config::{load_config_file, ConfigError, ConfigFile, ConfigOverrides, SyncConfig};
pub use event_file::{
    first_event_timestamp, is_valid_event_file, DecodeError, DecodedValue, EventFileReader,
    EventFileWriter, FileReadError, FrameError,
};
pub use export::{
    custom_run_id, ExportError, FileOutcome, FileStatus, RunExporter, SyncReport,
    TENSORBOARD_PATH_FIELD,
};
pub use hooks::{
    DispatchTable, Framework, FrameworkIntegrator, FrameworkVersion, HookError, HookTarget,
    IntegrationState, IntegrationStrategy, SummaryCall, SummaryHookRegistry, SummaryWriter,
    UnsupportedVersionError,
};
pub use logging::{LogLevel, LoggingError};
pub use summary::{
    ChannelLimits, ConfigurationError, EvictionPolicy, HparamSet, HparamValue, RetentionBuffer,
    SummaryKind, SummaryPayload, SummaryRecord,
};
