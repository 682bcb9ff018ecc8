//! Decoded summary values and the bounded buffer that holds them during replay.

pub mod retention;

pub use retention::{ChannelLimits, ConfigurationError, EvictionPolicy, Flush, RetentionBuffer};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Channel kind of a summary value; capacities are configured per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Numeric,
    Image,
    Text,
}

impl SummaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryKind::Numeric => "numeric",
            SummaryKind::Image => "image",
            SummaryKind::Text => "text",
        }
    }
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by a decoded summary value.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryPayload {
    Numeric(f64),
    /// Encoded image bytes (PNG, JPEG, ...) exactly as stored in the event.
    Image(Vec<u8>),
    /// String values sharing one timestep.
    Text(Vec<String>),
}

/// One decoded `(tag, step, value, wall_time)` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub tag: String,
    pub step: Option<i64>,
    pub wall_time: Option<f64>,
    pub payload: SummaryPayload,
}

impl SummaryRecord {
    pub fn numeric(tag: impl Into<String>, value: f64) -> Self {
        Self::new(tag, SummaryPayload::Numeric(value))
    }

    pub fn image(tag: impl Into<String>, encoded: impl Into<Vec<u8>>) -> Self {
        Self::new(tag, SummaryPayload::Image(encoded.into()))
    }

    pub fn text<I, S>(tag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            tag,
            SummaryPayload::Text(values.into_iter().map(Into::into).collect()),
        )
    }

    fn new(tag: impl Into<String>, payload: SummaryPayload) -> Self {
        Self {
            tag: tag.into(),
            step: None,
            wall_time: None,
            payload,
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_wall_time(mut self, wall_time: f64) -> Self {
        self.wall_time = Some(wall_time);
        self
    }

    /// Channel kind derived from the payload.
    pub fn kind(&self) -> SummaryKind {
        match self.payload {
            SummaryPayload::Numeric(_) => SummaryKind::Numeric,
            SummaryPayload::Image(_) => SummaryKind::Image,
            SummaryPayload::Text(_) => SummaryKind::Text,
        }
    }
}

/// Hyperparameter value as logged by `add_hparams` or the hparams plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HparamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl fmt::Display for HparamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HparamValue::Bool(value) => write!(f, "{value}"),
            HparamValue::Number(value) => write!(f, "{value}"),
            HparamValue::Text(value) => f.write_str(value),
        }
    }
}

/// Hyperparameters of one session together with its summary metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HparamSet {
    pub hparams: BTreeMap<String, HparamValue>,
    pub metrics: BTreeMap<String, f64>,
}

impl HparamSet {
    pub fn is_empty(&self) -> bool {
        self.hparams.is_empty() && self.metrics.is_empty()
    }
}
