//! Translation of decoded summary values into tracked-run writes.
//!
//! Every record becomes writes under `<namespace>/<channel>/<tag>`. Write
//! failures are logged and counted, never propagated: one bad value must not
//! stop its siblings.

pub mod graph;
pub mod image;

pub use graph::{GraphCache, GraphError, GraphNode, GraphRenderer, GraphvizRenderer, ModelGraph};
pub use image::{BatchLayout, ImageLayout, ImageTensor, ImageTensorError, PixelData};

use crate::backend::{FieldPath, ImageArtifact, SeriesPoint, TrackedRun, TrackedValue};
use crate::event_file::DecodeError;
use crate::summary::{HparamSet, HparamValue, SummaryPayload, SummaryRecord};
use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_NAMESPACE: &str = "tensorboard";

pub const CHANNEL_SCALAR: &str = "scalar";
pub const CHANNEL_IMAGE: &str = "image";
pub const CHANNEL_IMAGES: &str = "images";
pub const CHANNEL_FIGURE: &str = "figure";
pub const CHANNEL_TEXT: &str = "text";
pub const CHANNEL_GRAPH: &str = "graph";
pub const CHANNEL_HPARAMS: &str = "hparams";
pub const CHANNEL_METRICS: &str = "metrics";

const TEXT_SEPARATOR: &str = ", ";

/// One side-effecting call against a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunWrite {
    Append { path: String, point: SeriesPoint },
    Assign { path: String, value: TrackedValue },
}

impl RunWrite {
    pub fn path(&self) -> &str {
        match self {
            RunWrite::Append { path, .. } | RunWrite::Assign { path, .. } => path,
        }
    }
}

/// Write counts for one forwarded batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardOutcome {
    pub written: u64,
    pub dropped: u64,
}

impl AddAssign for ForwardOutcome {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.dropped += other.dropped;
    }
}

/// Result of a graph export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphUpload {
    Uploaded { id: Uuid, path: String },
    AlreadyUploaded { id: Uuid },
    RendererUnavailable,
    EmptyGraph,
    Failed,
}

pub struct ValueAdapter {
    namespace: FieldPath,
    graphs: GraphCache,
    renderer: Option<Arc<dyn GraphRenderer>>,
}

impl fmt::Debug for ValueAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAdapter")
            .field("namespace", &self.namespace)
            .field("graphs", &self.graphs.len())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl Default for ValueAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl ValueAdapter {
    /// Adapter writing under `namespace`, rendering graphs with Graphviz when
    /// `dot` is on `PATH`.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: FieldPath::new(namespace),
            graphs: GraphCache::new(),
            renderer: GraphvizRenderer::detect()
                .map(|renderer| Arc::new(renderer) as Arc<dyn GraphRenderer>),
        }
    }

    pub fn with_renderer(mut self, renderer: impl GraphRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn without_renderer(mut self) -> Self {
        self.renderer = None;
        self
    }

    pub fn namespace(&self) -> &FieldPath {
        &self.namespace
    }

    pub fn graph_cache(&self) -> &GraphCache {
        &self.graphs
    }

    /// `<namespace>/<channel>/<tag>`.
    pub fn path(&self, channel: &str, tag: &str) -> String {
        self.namespace.join(channel).join(tag).to_string()
    }

    /// `<namespace>/<name>`, used for Keras epoch metrics.
    pub fn metric_path(&self, name: &str) -> String {
        self.namespace.join(name).to_string()
    }

    /// Writes produced by one decoded record.
    pub fn record_writes(&self, record: &SummaryRecord) -> Result<Vec<RunWrite>, DecodeError> {
        let step = record.step.map(|step| step as f64);
        let (channel, value) = match &record.payload {
            SummaryPayload::Numeric(value) => (CHANNEL_SCALAR, TrackedValue::Float(*value)),
            SummaryPayload::Image(encoded) => {
                let artifact = ImageArtifact::decode(encoded)
                    .map_err(|err| DecodeError::invalid_image(&record.tag, err))?;
                (CHANNEL_IMAGE, TrackedValue::Image(artifact))
            }
            SummaryPayload::Text(values) => {
                (CHANNEL_TEXT, TrackedValue::Text(values.join(TEXT_SEPARATOR)))
            }
        };
        Ok(vec![RunWrite::Append {
            path: self.path(channel, &record.tag),
            point: SeriesPoint::new(value)
                .with_step(step)
                .with_timestamp(record.wall_time),
        }])
    }

    /// Assignments for a hyperparameter set and its metrics.
    pub fn hparam_writes(&self, set: &HparamSet) -> Vec<RunWrite> {
        let hparams = set.hparams.iter().map(|(name, value)| RunWrite::Assign {
            path: self.path(CHANNEL_HPARAMS, name),
            value: match value {
                HparamValue::Bool(flag) => TrackedValue::Bool(*flag),
                HparamValue::Number(number) => TrackedValue::Float(*number),
                HparamValue::Text(text) => TrackedValue::Text(text.clone()),
            },
        });
        let metrics = set.metrics.iter().map(|(name, value)| RunWrite::Assign {
            path: self.path(CHANNEL_METRICS, name),
            value: TrackedValue::Float(*value),
        });
        hparams.chain(metrics).collect()
    }

    /// Performs `writes` in order, logging and counting each failure.
    pub fn apply<I>(&self, run: &mut dyn TrackedRun, writes: I) -> ForwardOutcome
    where
        I: IntoIterator<Item = RunWrite>,
    {
        let mut outcome = ForwardOutcome::default();
        for write in writes {
            let path = write.path().to_string();
            let result = match write {
                RunWrite::Append { path, point } => run.append(&path, point),
                RunWrite::Assign { path, value } => run.assign(&path, value),
            };
            match result {
                Ok(()) => outcome.written += 1,
                Err(err) => {
                    warn!(run = run.id(), path = %path, error = %err, "dropping value after backend write failure");
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }

    /// Forwards one decoded record.
    pub fn forward(&self, run: &mut dyn TrackedRun, record: &SummaryRecord) -> ForwardOutcome {
        match self.record_writes(record) {
            Ok(writes) => self.apply(run, writes),
            Err(err) => {
                warn!(tag = %record.tag, error = %err, "dropping undecodable value");
                ForwardOutcome {
                    written: 0,
                    dropped: 1,
                }
            }
        }
    }

    pub fn forward_hparams(&self, run: &mut dyn TrackedRun, set: &HparamSet) -> ForwardOutcome {
        self.apply(run, self.hparam_writes(set))
    }

    /// Renders `graph` and uploads it once per `writer` identity.
    pub fn upload_graph(
        &self,
        run: &mut dyn TrackedRun,
        writer: &str,
        graph: &ModelGraph,
    ) -> GraphUpload {
        let Some(renderer) = self.renderer.as_ref() else {
            warn!("skipping model visualization because no graph renderer was found");
            return GraphUpload::RendererUnavailable;
        };
        if graph.is_empty() {
            warn!(writer, "skipping model visualization of an empty graph");
            return GraphUpload::EmptyGraph;
        }
        let (id, fresh) = self.graphs.identify(writer);
        if !fresh {
            debug!(writer, %id, "graph already uploaded for writer");
            return GraphUpload::AlreadyUploaded { id };
        }
        let path = self.path(CHANNEL_GRAPH, &id.to_string());
        let uploaded = renderer
            .render_png(&graph.to_dot())
            .and_then(|png| Ok(graph::png_tempfile(&png)?))
            .map_err(|err| err.to_string())
            .and_then(|file| {
                run.upload(&path, file.path())
                    .map_err(|err| err.to_string())
            });
        match uploaded {
            Ok(()) => GraphUpload::Uploaded { id, path },
            Err(reason) => {
                warn!(writer, path = %path, error = %reason, "graph upload failed");
                GraphUpload::Failed
            }
        }
    }
}
