use super::{DispatchTable, HookError, HookTarget, SummaryCall};
use crate::adapter::{BatchLayout, ImageLayout, ImageTensor, ModelGraph};
use crate::backend::{lock, ImageArtifact};
use crate::event_file::proto::{
    self, hparams_plugin_data, proto_value, summary_value, HParamsPluginData, ProtoValue,
    SessionStartInfo, Summary, SummaryImage, SummaryMetadata, SummaryValue, TensorProto,
};
use crate::event_file::{wall_time_now, EventFileWriter};
use crate::summary::{HparamSet, HparamValue};
use prost::Message;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Summary producer whose dispatch table writes TensorBoard event files.
///
/// Every public method routes through [`DispatchTable::call`], so hooks
/// installed on [`dispatch_table`](Self::dispatch_table) observe each call
/// before the event is written.
pub struct SummaryWriter {
    log_dir: PathBuf,
    event_file: PathBuf,
    table: Arc<DispatchTable>,
    output: Arc<Mutex<EventFileWriter>>,
}

impl SummaryWriter {
    /// Opens a new event file in `log_dir`, named after `hostname`.
    pub fn create(log_dir: impl AsRef<Path>, hostname: &str) -> io::Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        let output = EventFileWriter::create(&log_dir, hostname)?;
        let event_file = output.path().to_path_buf();
        let output = Arc::new(Mutex::new(output));
        let table = Arc::new(DispatchTable::new());
        for target in HookTarget::ALL {
            let output = Arc::clone(&output);
            table.register(target, move |call: &SummaryCall| {
                let mut output = lock(&output);
                write_call(&mut output, target, call).map_err(|reason| HookError::Failed {
                    target,
                    reason,
                })
            });
        }
        Ok(Self {
            log_dir,
            event_file,
            table,
            output,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn event_file(&self) -> &Path {
        &self.event_file
    }

    pub fn dispatch_table(&self) -> Arc<DispatchTable> {
        Arc::clone(&self.table)
    }

    /// Routes an arbitrary call, e.g. the TensorFlow entry points.
    pub fn call(&self, target: HookTarget, call: &SummaryCall) -> Result<(), HookError> {
        self.table.call(target, call)
    }

    pub fn add_scalar(&self, tag: &str, value: f64, step: Option<i64>) -> Result<(), HookError> {
        self.call(
            HookTarget::AddScalar,
            &SummaryCall::Scalar {
                tag: tag.to_string(),
                value,
                step,
                wall_time: Some(wall_time_now()),
            },
        )
    }

    pub fn add_image(
        &self,
        tag: &str,
        tensor: ImageTensor,
        step: Option<i64>,
        dataformats: &str,
    ) -> Result<(), HookError> {
        self.call(
            HookTarget::AddImage,
            &SummaryCall::Image {
                tag: tag.to_string(),
                tensor,
                dataformats: Some(dataformats.to_string()),
                step,
                wall_time: Some(wall_time_now()),
            },
        )
    }

    pub fn add_images(
        &self,
        tag: &str,
        tensor: ImageTensor,
        step: Option<i64>,
        dataformats: &str,
    ) -> Result<(), HookError> {
        self.call(
            HookTarget::AddImages,
            &SummaryCall::Images {
                tag: tag.to_string(),
                tensor,
                dataformats: dataformats.to_string(),
                step,
                wall_time: Some(wall_time_now()),
            },
        )
    }

    pub fn add_figure(
        &self,
        tag: &str,
        figure: ImageArtifact,
        step: Option<i64>,
    ) -> Result<(), HookError> {
        self.call(
            HookTarget::AddFigure,
            &SummaryCall::Figure {
                tag: tag.to_string(),
                figure,
                step,
                wall_time: Some(wall_time_now()),
            },
        )
    }

    pub fn add_text(&self, tag: &str, text: &str, step: Option<i64>) -> Result<(), HookError> {
        self.call(
            HookTarget::AddText,
            &SummaryCall::Text {
                tag: tag.to_string(),
                text: text.to_string(),
                step,
                wall_time: Some(wall_time_now()),
            },
        )
    }

    pub fn add_graph(&self, graph: ModelGraph) -> Result<(), HookError> {
        self.call(
            HookTarget::AddGraph,
            &SummaryCall::Graph {
                writer: self.log_dir.display().to_string(),
                graph,
            },
        )
    }

    pub fn add_hparams(
        &self,
        hparams: BTreeMap<String, HparamValue>,
        metrics: BTreeMap<String, f64>,
    ) -> Result<(), HookError> {
        self.call(
            HookTarget::AddHparams,
            &SummaryCall::Hparams(HparamSet { hparams, metrics }),
        )
    }

    pub fn flush(&self) -> io::Result<()> {
        lock(&self.output).flush()
    }
}

fn write_call(
    output: &mut EventFileWriter,
    target: HookTarget,
    call: &SummaryCall,
) -> Result<(), String> {
    let wall_time = call_wall_time(call).unwrap_or_else(wall_time_now);
    let step = call_step(call).unwrap_or_default();
    let values = match (target, call) {
        (_, SummaryCall::Scalar { tag, value, .. }) => vec![scalar_value(tag, *value)],
        (HookTarget::TfSummaryImage, SummaryCall::Image { tag, tensor, .. }) => {
            let frames = tensor.frames().map_err(|err| err.to_string())?;
            vec![images_value(tag, &frames)?]
        }
        (_, SummaryCall::Image { tag, tensor, dataformats, .. }) => {
            let layout = dataformats
                .as_deref()
                .unwrap_or(ImageLayout::Chw.as_str())
                .parse::<ImageLayout>()
                .map_err(|err| err.to_string())?;
            let image = tensor.to_image(layout).map_err(|err| err.to_string())?;
            vec![image_value(tag, &image)?]
        }
        (_, SummaryCall::Images { tag, tensor, dataformats, .. }) => {
            let layout = dataformats
                .parse::<BatchLayout>()
                .map_err(|err| err.to_string())?;
            let frames = tensor.batch(layout).map_err(|err| err.to_string())?;
            vec![images_value(tag, &frames)?]
        }
        (_, SummaryCall::Figure { tag, figure, .. }) => vec![image_value(tag, figure)?],
        (_, SummaryCall::Text { tag, text, .. }) => vec![text_value(tag, text)],
        (_, SummaryCall::Graph { graph, .. }) => {
            return output
                .write_graph(graph.to_graph_def().encode_to_vec(), wall_time)
                .map_err(|err| err.to_string());
        }
        (_, SummaryCall::Hparams(set)) => {
            let mut values = vec![hparams_value(set)];
            values.extend(
                set.metrics
                    .iter()
                    .map(|(name, value)| scalar_value(name, *value)),
            );
            values
        }
        (_, SummaryCall::EncodedSummary { summary, .. }) => {
            Summary::decode(summary.as_slice())
                .map_err(|err| err.to_string())?
                .value
        }
        (_, SummaryCall::EpochMetrics { logs, .. }) => logs
            .iter()
            .map(|(name, value)| scalar_value(&format!("epoch_{name}"), *value))
            .collect(),
    };
    output
        .write_summary(Summary { value: values }, step, wall_time)
        .map_err(|err| err.to_string())
}

fn call_step(call: &SummaryCall) -> Option<i64> {
    match call {
        SummaryCall::Scalar { step, .. }
        | SummaryCall::Image { step, .. }
        | SummaryCall::Images { step, .. }
        | SummaryCall::Figure { step, .. }
        | SummaryCall::Text { step, .. } => *step,
        SummaryCall::EncodedSummary { global_step, .. } => *global_step,
        SummaryCall::EpochMetrics { epoch, .. } => Some(*epoch),
        SummaryCall::Graph { .. } | SummaryCall::Hparams(_) => None,
    }
}

fn call_wall_time(call: &SummaryCall) -> Option<f64> {
    match call {
        SummaryCall::Scalar { wall_time, .. }
        | SummaryCall::Image { wall_time, .. }
        | SummaryCall::Images { wall_time, .. }
        | SummaryCall::Figure { wall_time, .. }
        | SummaryCall::Text { wall_time, .. } => *wall_time,
        _ => None,
    }
}

fn scalar_value(tag: &str, value: f64) -> SummaryValue {
    SummaryValue {
        tag: tag.to_string(),
        value: Some(summary_value::Value::SimpleValue(value as f32)),
        ..Default::default()
    }
}

fn image_value(tag: &str, image: &ImageArtifact) -> Result<SummaryValue, String> {
    let encoded = image.to_png().map_err(|err| err.to_string())?;
    let colorspace = i32::from(image.bitmap().color().channel_count());
    Ok(SummaryValue {
        tag: tag.to_string(),
        value: Some(summary_value::Value::Image(SummaryImage {
            height: image.height() as i32,
            width: image.width() as i32,
            colorspace,
            encoded_image_string: encoded,
        })),
        ..Default::default()
    })
}

/// Images plugin layout: `[width, height, png...]` as a string tensor.
fn images_value(tag: &str, frames: &[ImageArtifact]) -> Result<SummaryValue, String> {
    let (width, height) = frames
        .first()
        .map(|frame| (frame.width(), frame.height()))
        .unwrap_or_default();
    let mut strings = vec![width.to_string().into_bytes(), height.to_string().into_bytes()];
    for frame in frames {
        strings.push(frame.to_png().map_err(|err| err.to_string())?);
    }
    Ok(SummaryValue {
        tag: tag.to_string(),
        metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_IMAGES, Vec::new())),
        value: Some(summary_value::Value::Tensor(TensorProto::string_tensor(strings))),
        ..Default::default()
    })
}

fn text_value(tag: &str, text: &str) -> SummaryValue {
    SummaryValue {
        tag: tag.to_string(),
        metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_TEXT, Vec::new())),
        value: Some(summary_value::Value::Tensor(TensorProto::string_tensor(vec![
            text.as_bytes().to_vec(),
        ]))),
        ..Default::default()
    }
}

fn hparams_value(set: &HparamSet) -> SummaryValue {
    let hparams = set
        .hparams
        .iter()
        .map(|(name, value)| {
            let kind = match value {
                HparamValue::Bool(flag) => proto_value::Kind::BoolValue(*flag),
                HparamValue::Number(number) => proto_value::Kind::NumberValue(*number),
                HparamValue::Text(text) => proto_value::Kind::StringValue(text.clone()),
            };
            (name.clone(), ProtoValue { kind: Some(kind) })
        })
        .collect();
    let content = HParamsPluginData {
        version: 0,
        data: Some(hparams_plugin_data::Data::SessionStartInfo(SessionStartInfo {
            hparams,
            ..Default::default()
        })),
    }
    .encode_to_vec();
    SummaryValue {
        tag: proto::HPARAMS_SESSION_START_TAG.to_string(),
        metadata: Some(SummaryMetadata::for_plugin(proto::PLUGIN_HPARAMS, content)),
        value: Some(summary_value::Value::Tensor(TensorProto::default())),
        ..Default::default()
    }
}
