use super::proto::{
    self, hparams_plugin_data, proto_value, summary_value, Event, HParamsPluginData,
    SummaryValue, TensorProto,
};
use super::record::FrameError;
use crate::summary::{HparamSet, HparamValue, SummaryPayload, SummaryRecord};
use prost::Message;
use thiserror::Error;

/// A single malformed record or value.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("corrupt record framing: {0}")]
    Frame(#[from] FrameError),
    #[error("invalid event protobuf: {0}")]
    Proto(#[from] prost::DecodeError),
    #[error("tag {tag}: {reason}")]
    MalformedValue { tag: String, reason: String },
    #[error("tag {tag}: text value is not valid UTF-8")]
    InvalidUtf8 { tag: String },
    #[error("tag {tag}: cannot decode image: {reason}")]
    InvalidImage { tag: String, reason: String },
}

impl DecodeError {
    /// True when the record stream itself is broken, so nothing after this
    /// point in the file can be read.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, DecodeError::Frame(_) | DecodeError::Proto(_))
    }

    pub fn invalid_image(tag: &str, reason: impl ToString) -> Self {
        DecodeError::InvalidImage {
            tag: tag.to_string(),
            reason: reason.to_string(),
        }
    }

    fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        DecodeError::MalformedValue {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

/// Value extracted from an event.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Record(SummaryRecord),
    Hparams(HparamSet),
}

/// Decodes every supported summary value carried by `event`.
///
/// Values of unsupported kinds (histograms, audio, ...) yield nothing; a
/// malformed value yields an error without affecting its siblings.
pub fn decode_event(event: &Event) -> Vec<Result<DecodedValue, DecodeError>> {
    let Some(proto::event::What::Summary(summary)) = &event.what else {
        return Vec::new();
    };
    let wall_time = (event.wall_time > 0.0).then_some(event.wall_time);
    let mut decoded = Vec::new();
    for value in &summary.value {
        decode_value(value, event.step, wall_time, &mut decoded);
    }
    decoded
}

/// Decodes a serialized `Summary` message outside of an event envelope.
pub fn decode_summary_bytes(
    bytes: &[u8],
    step: i64,
    wall_time: Option<f64>,
) -> Result<Vec<Result<DecodedValue, DecodeError>>, DecodeError> {
    let summary = proto::Summary::decode(bytes)?;
    let mut decoded = Vec::new();
    for value in &summary.value {
        decode_value(value, step, wall_time, &mut decoded);
    }
    Ok(decoded)
}

fn decode_value(
    value: &SummaryValue,
    step: i64,
    wall_time: Option<f64>,
    out: &mut Vec<Result<DecodedValue, DecodeError>>,
) {
    let tag = value.tag.as_str();
    let plugin = value
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.plugin_name())
        .unwrap_or_default();
    let record = |payload: SummaryPayload| -> Result<DecodedValue, DecodeError> {
        Ok(DecodedValue::Record(SummaryRecord {
            tag: tag.to_string(),
            step: Some(step),
            wall_time,
            payload,
        }))
    };

    if plugin == proto::PLUGIN_HPARAMS {
        if tag == proto::HPARAMS_SESSION_START_TAG {
            out.push(decode_hparams(value).map(DecodedValue::Hparams));
        }
        return;
    }

    match &value.value {
        Some(summary_value::Value::SimpleValue(simple)) => {
            out.push(record(SummaryPayload::Numeric(f64::from(*simple))));
        }
        Some(summary_value::Value::Image(image)) => {
            out.push(record(SummaryPayload::Image(
                image.encoded_image_string.clone(),
            )));
        }
        Some(summary_value::Value::Tensor(tensor)) => match tensor.dtype {
            proto::DT_STRING if plugin == proto::PLUGIN_IMAGES => {
                // [width, height, encoded...]
                for encoded in tensor.string_val.iter().skip(2) {
                    out.push(record(SummaryPayload::Image(encoded.clone())));
                }
            }
            proto::DT_STRING => {
                out.push(
                    decode_text(tag, tensor).and_then(|texts| record(SummaryPayload::Text(texts))),
                );
            }
            proto::DT_FLOAT | proto::DT_DOUBLE
                if plugin.is_empty() || plugin == proto::PLUGIN_SCALARS =>
            {
                out.push(
                    decode_scalar(tag, tensor)
                        .and_then(|scalar| record(SummaryPayload::Numeric(scalar))),
                );
            }
            _ => {}
        },
        None => {}
    }
}

fn decode_text(tag: &str, tensor: &TensorProto) -> Result<Vec<String>, DecodeError> {
    tensor
        .string_val
        .iter()
        .map(|raw| {
            String::from_utf8(raw.clone()).map_err(|_| DecodeError::InvalidUtf8 {
                tag: tag.to_string(),
            })
        })
        .collect()
}

fn decode_scalar(tag: &str, tensor: &TensorProto) -> Result<f64, DecodeError> {
    let elements: i64 = tensor.dims().iter().product();
    if elements != 1 {
        return Err(DecodeError::malformed(
            tag,
            format!("expected a scalar tensor, found {elements} elements"),
        ));
    }
    if let Some(value) = tensor.float_val.first() {
        return Ok(f64::from(*value));
    }
    if let Some(value) = tensor.double_val.first() {
        return Ok(*value);
    }
    let content = tensor.tensor_content.as_slice();
    match (tensor.dtype, content.len()) {
        (proto::DT_FLOAT, 4) => Ok(f64::from(f32::from_le_bytes([
            content[0], content[1], content[2], content[3],
        ]))),
        (proto::DT_DOUBLE, 8) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(content);
            Ok(f64::from_le_bytes(raw))
        }
        (_, len) => Err(DecodeError::malformed(
            tag,
            format!("scalar tensor has {len} content bytes"),
        )),
    }
}

fn decode_hparams(value: &SummaryValue) -> Result<HparamSet, DecodeError> {
    let content = value
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.plugin_data.as_ref())
        .map(|data| data.content.as_slice())
        .unwrap_or_default();
    let plugin_data = HParamsPluginData::decode(content)
        .map_err(|err| DecodeError::malformed(&value.tag, err.to_string()))?;
    let mut set = HparamSet::default();
    if let Some(hparams_plugin_data::Data::SessionStartInfo(info)) = plugin_data.data {
        for (name, raw) in info.hparams {
            let parsed = match raw.kind {
                Some(proto_value::Kind::NumberValue(number)) => HparamValue::Number(number),
                Some(proto_value::Kind::StringValue(text)) => HparamValue::Text(text),
                Some(proto_value::Kind::BoolValue(flag)) => HparamValue::Bool(flag),
                None => continue,
            };
            set.hparams.insert(name, parsed);
        }
    }
    Ok(set)
}
