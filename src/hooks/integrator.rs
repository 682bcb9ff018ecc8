use super::{DispatchTable, HookTarget, PreHook, SummaryCall, SummaryHookRegistry};
use crate::adapter::{
    BatchLayout, ImageLayout, RunWrite, ValueAdapter, CHANNEL_FIGURE, CHANNEL_IMAGE,
    CHANNEL_IMAGES, CHANNEL_SCALAR, CHANNEL_TEXT,
};
use crate::backend::{lock, ImageArtifact, SeriesPoint, TrackedRun, TrackedValue};
use crate::event_file::{decode_summary_bytes, wall_time_now, DecodedValue};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Keras log keys that are bookkeeping rather than metrics.
const SKIPPED_EPOCH_KEYS: [&str; 3] = ["batch", "size", "num_steps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framework {
    TensorFlow,
    PyTorch,
    TensorBoardX,
}

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Framework::TensorFlow => "tensorflow",
            Framework::PyTorch => "pytorch",
            Framework::TensorBoardX => "tensorboardx",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tensorflow" | "tf" => Ok(Framework::TensorFlow),
            "pytorch" | "torch" => Ok(Framework::PyTorch),
            "tensorboardx" | "tbx" => Ok(Framework::TensorBoardX),
            other => Err(format!("unknown framework {other:?}")),
        }
    }
}

/// `major.minor.patch[-pre][+build]`; a pre-release sorts before its release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl FrameworkVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    pub fn with_pre(mut self, pre: &str) -> Self {
        self.pre = Some(pre.to_string());
        self
    }

    /// Accepts `2.3.1`, `1.15`, `2.0.0-rc0`, `2.0.0rc0` and `1.13.1+cu117`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let raw = raw.split('+').next().unwrap_or(raw);
        let core_end = raw
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(raw.len());
        let (core, rest) = raw.split_at(core_end);
        let core = core.trim_end_matches('.');
        let pre = rest.trim_start_matches(['-', '.']);

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(part) => part.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        if !rest.is_empty() && pre.is_empty() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            pre: (!pre.is_empty()).then(|| pre.to_string()),
        })
    }
}

impl Ord for FrameworkVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(left), Some(right)) => left.cmp(right),
            })
    }
}

impl PartialOrd for FrameworkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized {framework} version: {version}; consider upgrading tbsync and the framework")]
pub struct UnsupportedVersionError {
    pub framework: Framework,
    pub version: String,
}

/// Keras callback method carrying epoch metrics; renamed in TensorFlow 2.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KerasMetricsHook {
    LogMetrics,
    LogEpochMetrics,
}

impl KerasMetricsHook {
    pub fn target(self) -> HookTarget {
        match self {
            KerasMetricsHook::LogMetrics => HookTarget::KerasLogMetrics,
            KerasMetricsHook::LogEpochMetrics => HookTarget::KerasLogEpochMetrics,
        }
    }
}

/// Version-gated integration behaviour, chosen once per integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStrategy {
    TensorFlow2 { keras: KerasMetricsHook },
    TensorFlow1,
    SummaryWriter,
}

impl IntegrationStrategy {
    pub fn select(framework: Framework, version: &str) -> Result<Self, UnsupportedVersionError> {
        let unsupported = || UnsupportedVersionError {
            framework,
            version: version.to_string(),
        };
        let parsed = FrameworkVersion::parse(version).ok_or_else(unsupported)?;
        match framework {
            Framework::TensorFlow => {
                if parsed >= FrameworkVersion::new(2, 0, 0).with_pre("rc0") {
                    let keras = if parsed < FrameworkVersion::new(2, 3, 0).with_pre("rc0") {
                        KerasMetricsHook::LogMetrics
                    } else {
                        KerasMetricsHook::LogEpochMetrics
                    };
                    Ok(IntegrationStrategy::TensorFlow2 { keras })
                } else if parsed >= FrameworkVersion::new(1, 0, 0) {
                    Ok(IntegrationStrategy::TensorFlow1)
                } else {
                    Err(unsupported())
                }
            }
            Framework::PyTorch if parsed >= FrameworkVersion::new(1, 1, 0) => {
                Ok(IntegrationStrategy::SummaryWriter)
            }
            Framework::TensorBoardX if parsed >= FrameworkVersion::new(1, 0, 0) => {
                Ok(IntegrationStrategy::SummaryWriter)
            }
            Framework::PyTorch | Framework::TensorBoardX => Err(unsupported()),
        }
    }

    /// Entry points this strategy hooks.
    pub fn targets(self) -> Vec<HookTarget> {
        match self {
            IntegrationStrategy::TensorFlow2 { keras } => vec![
                HookTarget::TfSummaryScalar,
                HookTarget::TfSummaryImage,
                HookTarget::TfSummaryText,
                keras.target(),
            ],
            IntegrationStrategy::TensorFlow1 => vec![HookTarget::TfFileWriterAddSummary],
            IntegrationStrategy::SummaryWriter => vec![
                HookTarget::AddScalar,
                HookTarget::AddImage,
                HookTarget::AddImages,
                HookTarget::AddFigure,
                HookTarget::AddText,
                HookTarget::AddGraph,
                HookTarget::AddHparams,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationState {
    Uninstalled,
    Installed,
}

/// Mirrors live summary calls into the run.
#[derive(Clone)]
struct LiveMirror {
    adapter: Arc<ValueAdapter>,
    run: Arc<Mutex<Box<dyn TrackedRun>>>,
}

impl LiveMirror {
    fn handle(&self, target: HookTarget, call: &SummaryCall) {
        let adapter = self.adapter.as_ref();
        match (target, call) {
            (
                HookTarget::TfSummaryScalar | HookTarget::AddScalar,
                SummaryCall::Scalar {
                    tag,
                    value,
                    step,
                    wall_time,
                },
            ) => self.write(vec![append(
                adapter.path(CHANNEL_SCALAR, tag),
                TrackedValue::Float(*value),
                *step,
                *wall_time,
            )]),
            (
                HookTarget::TfSummaryImage,
                SummaryCall::Image {
                    tag,
                    tensor,
                    step,
                    wall_time,
                    ..
                },
            ) => match tensor.frames() {
                Ok(frames) if tensor.rank() == 4 => self.append_images(
                    adapter.path(CHANNEL_IMAGE, tag),
                    frames,
                    *step,
                    *wall_time,
                ),
                Ok(frames) => {
                    let path = adapter.path(CHANNEL_IMAGE, tag);
                    self.write(
                        frames
                            .into_iter()
                            .map(|frame| assign(&path, TrackedValue::Image(frame)))
                            .collect(),
                    )
                }
                Err(err) => warn!(tag = %tag, error = %err, "skipping image summary"),
            },
            (
                HookTarget::AddImage,
                SummaryCall::Image {
                    tag,
                    tensor,
                    dataformats,
                    ..
                },
            ) => {
                let converted = dataformats
                    .as_deref()
                    .unwrap_or(ImageLayout::Chw.as_str())
                    .parse::<ImageLayout>()
                    .and_then(|layout| tensor.to_image(layout));
                match converted {
                    Ok(image) => self.write(vec![assign(
                        &adapter.path(CHANNEL_IMAGE, tag),
                        TrackedValue::Image(image),
                    )]),
                    Err(err) => warn!(tag = %tag, error = %err, "skipping image"),
                }
            }
            (
                HookTarget::AddImages,
                SummaryCall::Images {
                    tag,
                    tensor,
                    dataformats,
                    step,
                    wall_time,
                },
            ) => match dataformats.parse::<BatchLayout>() {
                Ok(layout) => match tensor.batch(layout) {
                    Ok(frames) => self.append_images(
                        adapter.path(CHANNEL_IMAGES, tag),
                        frames,
                        *step,
                        *wall_time,
                    ),
                    Err(err) => warn!(tag = %tag, error = %err, "skipping images"),
                },
                Err(_) => warn!(
                    tag = %tag,
                    "skipping logging images as {dataformats} is not supported"
                ),
            },
            (
                HookTarget::AddFigure,
                SummaryCall::Figure {
                    tag,
                    figure,
                    step,
                    wall_time,
                },
            ) => self.write(vec![append(
                adapter.path(CHANNEL_FIGURE, tag),
                TrackedValue::Image(figure.clone()),
                *step,
                *wall_time,
            )]),
            (HookTarget::TfSummaryText, SummaryCall::Text { tag, text, .. }) => self.write(vec![
                assign(&adapter.path(CHANNEL_TEXT, tag), TrackedValue::Text(text.clone())),
            ]),
            (
                HookTarget::AddText,
                SummaryCall::Text {
                    tag,
                    text,
                    step,
                    wall_time,
                },
            ) => self.write(vec![append(
                adapter.path(CHANNEL_TEXT, tag),
                TrackedValue::Text(text.clone()),
                *step,
                *wall_time,
            )]),
            (HookTarget::AddGraph, SummaryCall::Graph { writer, graph }) => {
                let mut run = lock(&self.run);
                adapter.upload_graph(&mut **run, writer, graph);
            }
            (HookTarget::AddHparams, SummaryCall::Hparams(set)) => {
                self.write(adapter.hparam_writes(set));
            }
            (
                HookTarget::TfFileWriterAddSummary,
                SummaryCall::EncodedSummary {
                    summary,
                    global_step,
                },
            ) => self.forward_encoded(summary, *global_step),
            (
                HookTarget::KerasLogMetrics | HookTarget::KerasLogEpochMetrics,
                SummaryCall::EpochMetrics { epoch, logs },
            ) => self.write(
                logs.iter()
                    .filter(|(name, _)| !SKIPPED_EPOCH_KEYS.contains(&name.as_str()))
                    .map(|(name, value)| {
                        append(
                            adapter.metric_path(name),
                            TrackedValue::Float(*value),
                            Some(*epoch),
                            None,
                        )
                    })
                    .collect(),
            ),
            (target, call) => {
                debug!(%target, call = call.kind(), "ignoring call the hook does not mirror")
            }
        }
    }

    fn write(&self, writes: Vec<RunWrite>) {
        let mut run = lock(&self.run);
        self.adapter.apply(&mut **run, writes);
    }

    fn append_images(
        &self,
        path: String,
        frames: Vec<ImageArtifact>,
        step: Option<i64>,
        wall_time: Option<f64>,
    ) {
        self.write(
            frames
                .into_iter()
                .map(|frame| append(path.clone(), TrackedValue::Image(frame), step, wall_time))
                .collect(),
        )
    }

    /// Step falls back to the current time when the caller gave none.
    fn forward_encoded(&self, summary: &[u8], global_step: Option<i64>) {
        let now = wall_time_now();
        let step = global_step.unwrap_or(now as i64);
        let values = match decode_summary_bytes(summary, step, Some(now)) {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "dropping undecodable summary");
                return;
            }
        };
        let mut run = lock(&self.run);
        for value in values {
            match value {
                Ok(DecodedValue::Record(record)) => {
                    self.adapter.forward(&mut **run, &record);
                }
                Ok(DecodedValue::Hparams(set)) => {
                    self.adapter.forward_hparams(&mut **run, &set);
                }
                Err(err) => warn!(error = %err, "dropping undecodable summary value"),
            }
        }
    }
}

fn append(path: String, value: TrackedValue, step: Option<i64>, wall_time: Option<f64>) -> RunWrite {
    RunWrite::Append {
        path,
        point: SeriesPoint::new(value)
            .with_step(step.map(|step| step as f64))
            .with_timestamp(wall_time),
    }
}

fn assign(path: &str, value: TrackedValue) -> RunWrite {
    RunWrite::Assign {
        path: path.to_string(),
        value,
    }
}

/// Hooks one framework's entry points into a live run.
pub struct FrameworkIntegrator {
    framework: Framework,
    version: String,
    strategy: IntegrationStrategy,
    state: IntegrationState,
    registry: SummaryHookRegistry,
    mirror: LiveMirror,
}

impl fmt::Debug for FrameworkIntegrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkIntegrator")
            .field("framework", &self.framework)
            .field("version", &self.version)
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .finish()
    }
}

impl FrameworkIntegrator {
    /// Selects the strategy for `framework` at `version`; nothing is hooked
    /// until [`install`](Self::install).
    pub fn new(
        framework: Framework,
        version: &str,
        table: Arc<DispatchTable>,
        run: Box<dyn TrackedRun>,
        adapter: ValueAdapter,
    ) -> Result<Self, UnsupportedVersionError> {
        let strategy = IntegrationStrategy::select(framework, version)?;
        Ok(Self {
            framework,
            version: version.to_string(),
            strategy,
            state: IntegrationState::Uninstalled,
            registry: SummaryHookRegistry::new(table),
            mirror: LiveMirror {
                adapter: Arc::new(adapter),
                run: Arc::new(Mutex::new(run)),
            },
        })
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    pub fn strategy(&self) -> IntegrationStrategy {
        self.strategy
    }

    pub fn state(&self) -> IntegrationState {
        self.state
    }

    pub fn adapter(&self) -> &ValueAdapter {
        &self.mirror.adapter
    }

    /// Targets this integrator currently has wrapped.
    pub fn hooked(&self) -> Vec<HookTarget> {
        self.registry.installed()
    }

    /// Hooks the strategy's targets. A no-op when already installed; targets
    /// hooked by another integrator are skipped.
    pub fn install(&mut self) -> Vec<HookTarget> {
        if self.state == IntegrationState::Installed {
            return Vec::new();
        }
        let mirror = self.mirror.clone();
        let pre: PreHook =
            Arc::new(move |target: HookTarget, call: &SummaryCall| mirror.handle(target, call));
        let targets = self.strategy.targets();
        let wrapped = self.registry.install(targets.iter().copied(), pre);
        for target in targets.iter().filter(|target| !wrapped.contains(*target)) {
            debug!(%target, "target missing or already hooked; left untouched");
        }
        info!(
            framework = %self.framework,
            version = %self.version,
            hooked = wrapped.len(),
            "summary hooks installed"
        );
        self.state = IntegrationState::Installed;
        wrapped
    }

    /// Puts the original entries back. A no-op when not installed.
    pub fn restore(&mut self) -> usize {
        if self.state == IntegrationState::Uninstalled {
            return 0;
        }
        let restored = self.registry.restore();
        self.state = IntegrationState::Uninstalled;
        debug!(framework = %self.framework, restored, "summary hooks restored");
        restored
    }

    /// Installs and returns a guard that restores when dropped.
    pub fn activate(&mut self) -> ActivationGuard<'_> {
        self.install();
        ActivationGuard { integrator: self }
    }
}

/// Scoped activation from [`FrameworkIntegrator::activate`].
pub struct ActivationGuard<'a> {
    integrator: &'a mut FrameworkIntegrator,
}

impl ActivationGuard<'_> {
    pub fn state(&self) -> IntegrationState {
        self.integrator.state()
    }

    pub fn hooked(&self) -> Vec<HookTarget> {
        self.integrator.hooked()
    }
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        self.integrator.restore();
    }
}
