//! Explicit hook points for summary-producing APIs.
//!
//! A producer registers one callable per [`HookTarget`] in a
//! [`DispatchTable`] and routes every summary call through
//! [`DispatchTable::call`]. [`SummaryHookRegistry`] swaps entries for
//! wrappers that run a pre-hook and then the original, and puts the
//! originals back on `restore`.

pub mod integrator;
pub mod writer;

pub use integrator::{
    ActivationGuard, Framework, FrameworkIntegrator, FrameworkVersion, IntegrationState,
    IntegrationStrategy, KerasMetricsHook, UnsupportedVersionError,
};
pub use writer::SummaryWriter;

use crate::adapter::{ImageTensor, ModelGraph};
use crate::backend::{lock, ImageArtifact};
use crate::summary::HparamSet;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Named entry point of a producing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookTarget {
    TfSummaryScalar,
    TfSummaryImage,
    TfSummaryText,
    KerasLogMetrics,
    KerasLogEpochMetrics,
    TfFileWriterAddSummary,
    AddScalar,
    AddImage,
    AddImages,
    AddFigure,
    AddText,
    AddGraph,
    AddHparams,
}

impl HookTarget {
    pub const ALL: [HookTarget; 13] = [
        HookTarget::TfSummaryScalar,
        HookTarget::TfSummaryImage,
        HookTarget::TfSummaryText,
        HookTarget::KerasLogMetrics,
        HookTarget::KerasLogEpochMetrics,
        HookTarget::TfFileWriterAddSummary,
        HookTarget::AddScalar,
        HookTarget::AddImage,
        HookTarget::AddImages,
        HookTarget::AddFigure,
        HookTarget::AddText,
        HookTarget::AddGraph,
        HookTarget::AddHparams,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookTarget::TfSummaryScalar => "tf.summary.scalar",
            HookTarget::TfSummaryImage => "tf.summary.image",
            HookTarget::TfSummaryText => "tf.summary.text",
            HookTarget::KerasLogMetrics => "TensorBoard._log_metrics",
            HookTarget::KerasLogEpochMetrics => "TensorBoard._log_epoch_metrics",
            HookTarget::TfFileWriterAddSummary => "FileWriter.add_summary",
            HookTarget::AddScalar => "SummaryWriter.add_scalar",
            HookTarget::AddImage => "SummaryWriter.add_image",
            HookTarget::AddImages => "SummaryWriter.add_images",
            HookTarget::AddFigure => "SummaryWriter.add_figure",
            HookTarget::AddText => "SummaryWriter.add_text",
            HookTarget::AddGraph => "SummaryWriter.add_graph",
            HookTarget::AddHparams => "SummaryWriter.add_hparams",
        }
    }
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of one summary call.
#[derive(Debug, Clone)]
pub enum SummaryCall {
    Scalar {
        tag: String,
        value: f64,
        step: Option<i64>,
        wall_time: Option<f64>,
    },
    /// `dataformats` is `None` for TensorFlow, whose tensors are HWC or NHWC.
    Image {
        tag: String,
        tensor: ImageTensor,
        dataformats: Option<String>,
        step: Option<i64>,
        wall_time: Option<f64>,
    },
    Images {
        tag: String,
        tensor: ImageTensor,
        dataformats: String,
        step: Option<i64>,
        wall_time: Option<f64>,
    },
    Figure {
        tag: String,
        figure: ImageArtifact,
        step: Option<i64>,
        wall_time: Option<f64>,
    },
    Text {
        tag: String,
        text: String,
        step: Option<i64>,
        wall_time: Option<f64>,
    },
    Graph {
        /// Identity of the writer, normally its log directory.
        writer: String,
        graph: ModelGraph,
    },
    Hparams(HparamSet),
    /// A serialized `Summary` proto as passed to `FileWriter.add_summary`.
    EncodedSummary {
        summary: Vec<u8>,
        global_step: Option<i64>,
    },
    EpochMetrics {
        epoch: i64,
        logs: BTreeMap<String, f64>,
    },
}

impl SummaryCall {
    pub fn kind(&self) -> &'static str {
        match self {
            SummaryCall::Scalar { .. } => "scalar",
            SummaryCall::Image { .. } => "image",
            SummaryCall::Images { .. } => "images",
            SummaryCall::Figure { .. } => "figure",
            SummaryCall::Text { .. } => "text",
            SummaryCall::Graph { .. } => "graph",
            SummaryCall::Hparams(_) => "hparams",
            SummaryCall::EncodedSummary { .. } => "encoded summary",
            SummaryCall::EpochMetrics { .. } => "epoch metrics",
        }
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("no callable registered for {0}")]
    Unregistered(HookTarget),
    #[error("{target} does not accept a {call} call")]
    UnexpectedCall {
        target: HookTarget,
        call: &'static str,
    },
    #[error("{target} failed: {reason}")]
    Failed { target: HookTarget, reason: String },
}

/// Callable stored in a dispatch table.
pub type HookFn = Arc<dyn Fn(&SummaryCall) -> Result<(), HookError> + Send + Sync>;

/// Pre-hook run before the original; failures are handled inside it.
pub type PreHook = Arc<dyn Fn(HookTarget, &SummaryCall) + Send + Sync>;

#[derive(Default)]
struct TableState {
    entries: HashMap<HookTarget, HookFn>,
    hooked: BTreeSet<HookTarget>,
}

/// Registration point a producer exposes instead of patchable globals.
#[derive(Default)]
pub struct DispatchTable {
    state: Mutex<TableState>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        let mut targets: Vec<_> = state.entries.keys().copied().collect();
        targets.sort();
        f.debug_struct("DispatchTable")
            .field("targets", &targets)
            .field("hooked", &state.hooked)
            .finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callable for `target`, replacing any previous one.
    pub fn register<F>(&self, target: HookTarget, callable: F)
    where
        F: Fn(&SummaryCall) -> Result<(), HookError> + Send + Sync + 'static,
    {
        lock(&self.state).entries.insert(target, Arc::new(callable));
    }

    /// Invokes the current callable for `target`. The table lock is not
    /// held during the call.
    pub fn call(&self, target: HookTarget, call: &SummaryCall) -> Result<(), HookError> {
        let callable = self.entry(target).ok_or(HookError::Unregistered(target))?;
        callable(call)
    }

    pub fn entry(&self, target: HookTarget) -> Option<HookFn> {
        lock(&self.state).entries.get(&target).cloned()
    }

    pub fn targets(&self) -> Vec<HookTarget> {
        let mut targets: Vec<_> = lock(&self.state).entries.keys().copied().collect();
        targets.sort();
        targets
    }

    pub fn is_hooked(&self, target: HookTarget) -> bool {
        lock(&self.state).hooked.contains(&target)
    }

    pub fn hooked_targets(&self) -> Vec<HookTarget> {
        lock(&self.state).hooked.iter().copied().collect()
    }

    /// Replaces `target` with a wrapper. Returns the original, or `None`
    /// when the target is missing or already hooked.
    fn wrap(&self, target: HookTarget, pre: PreHook) -> Option<HookFn> {
        let mut state = lock(&self.state);
        if state.hooked.contains(&target) {
            return None;
        }
        let original = state.entries.get(&target)?.clone();
        let inner = original.clone();
        let wrapper: HookFn = Arc::new(move |call: &SummaryCall| {
            pre(target, call);
            inner(call)
        });
        state.entries.insert(target, wrapper);
        state.hooked.insert(target);
        Some(original)
    }

    fn unwrap_target(&self, target: HookTarget, original: HookFn) {
        let mut state = lock(&self.state);
        state.entries.insert(target, original);
        state.hooked.remove(&target);
    }
}

/// Originals of the entries this registry wrapped.
pub struct SummaryHookRegistry {
    table: Arc<DispatchTable>,
    originals: Vec<(HookTarget, HookFn)>,
}

impl fmt::Debug for SummaryHookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryHookRegistry")
            .field("installed", &self.installed())
            .finish()
    }
}

impl SummaryHookRegistry {
    pub fn new(table: Arc<DispatchTable>) -> Self {
        Self {
            table,
            originals: Vec::new(),
        }
    }

    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    /// Wraps each target with `pre`; already-hooked or unregistered targets
    /// are left alone. Returns the targets wrapped by this call.
    pub fn install<I>(&mut self, targets: I, pre: PreHook) -> Vec<HookTarget>
    where
        I: IntoIterator<Item = HookTarget>,
    {
        let mut wrapped = Vec::new();
        for target in targets {
            if let Some(original) = self.table.wrap(target, pre.clone()) {
                self.originals.push((target, original));
                wrapped.push(target);
            }
        }
        wrapped
    }

    /// Puts every original back. Returns how many entries were restored.
    pub fn restore(&mut self) -> usize {
        let restored = self.originals.len();
        while let Some((target, original)) = self.originals.pop() {
            self.table.unwrap_target(target, original);
        }
        restored
    }

    pub fn installed(&self) -> Vec<HookTarget> {
        self.originals.iter().map(|(target, _)| *target).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}
