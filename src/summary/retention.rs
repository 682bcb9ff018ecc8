use super::{SummaryKind, SummaryRecord};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Default per-tag cap for numeric channels.
pub const DEFAULT_NUMERIC_CAPACITY: i64 = 100_000;
/// Default per-tag cap for image channels.
pub const DEFAULT_IMAGE_CAPACITY: i64 = 1_000;
/// Default per-tag cap for text channels.
pub const DEFAULT_TEXT_CAPACITY: i64 = 10_000;

/// Raised when channel limits cannot be turned into a buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("capacity for {kind} channels must be >= 0 (got {value})")]
    NegativeCapacity { kind: SummaryKind, value: i64 },
}

/// Per-kind capacities supplied for one import run.
///
/// Values are signed so that configuration mistakes surface as
/// [`ConfigurationError`] instead of silently wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLimits {
    pub numeric: i64,
    pub image: i64,
    pub text: i64,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            numeric: DEFAULT_NUMERIC_CAPACITY,
            image: DEFAULT_IMAGE_CAPACITY,
            text: DEFAULT_TEXT_CAPACITY,
        }
    }
}

impl ChannelLimits {
    pub fn new(numeric: i64, image: i64, text: i64) -> Self {
        Self {
            numeric,
            image,
            text,
        }
    }

    /// Rejects negative capacities.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (kind, value) in [
            (SummaryKind::Numeric, self.numeric),
            (SummaryKind::Image, self.image),
            (SummaryKind::Text, self.text),
        ] {
            if value < 0 {
                return Err(ConfigurationError::NegativeCapacity { kind, value });
            }
        }
        Ok(())
    }

    fn capacities(&self) -> Result<Capacities, ConfigurationError> {
        self.validate()?;
        Ok(Capacities {
            numeric: self.numeric as usize,
            image: self.image as usize,
            text: self.text as usize,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Capacities {
    numeric: usize,
    image: usize,
    text: usize,
}

impl Capacities {
    fn for_kind(&self, kind: SummaryKind) -> usize {
        match kind {
            SummaryKind::Numeric => self.numeric,
            SummaryKind::Image => self.image,
            SummaryKind::Text => self.text,
        }
    }
}

/// How a full sequence picks the element to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Random interior element; first and last samples always survive.
    SpreadSample,
    /// Oldest element; the sequence is a sliding window of recent samples.
    SlidingWindow,
}

impl EvictionPolicy {
    pub fn for_kind(kind: SummaryKind) -> Self {
        match kind {
            SummaryKind::Numeric => EvictionPolicy::SpreadSample,
            SummaryKind::Image | SummaryKind::Text => EvictionPolicy::SlidingWindow,
        }
    }

    /// Position to evict from a sequence of `len` elements (`len >= 1`).
    pub fn victim(self, len: usize, rng: &mut dyn RngCore) -> usize {
        match self {
            // With no interior position left the oldest sample goes.
            EvictionPolicy::SpreadSample if len > 2 => rng.gen_range(1..len - 1),
            EvictionPolicy::SpreadSample | EvictionPolicy::SlidingWindow => 0,
        }
    }
}

/// Bounded per-tag store used while replaying one event file.
pub struct RetentionBuffer {
    capacities: Capacities,
    order: Vec<String>,
    sequences: HashMap<String, VecDeque<SummaryRecord>>,
    rng: Box<dyn RngCore + Send>,
    evicted_total: u64,
    dropped_total: u64,
}

impl RetentionBuffer {
    /// Creates a buffer sampling numeric evictions from an entropy-seeded generator.
    pub fn new(limits: ChannelLimits) -> Result<Self, ConfigurationError> {
        Self::with_rng(limits, Box::new(ChaCha8Rng::from_entropy()))
    }

    /// Creates a buffer with a caller-supplied random source (used in tests).
    pub fn with_rng(
        limits: ChannelLimits,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            capacities: limits.capacities()?,
            order: Vec::new(),
            sequences: HashMap::new(),
            rng,
            evicted_total: 0,
            dropped_total: 0,
        })
    }

    /// Appends a record and evicts at most one element from its tag's sequence.
    ///
    /// Returns the evicted record, if any. Records whose kind has capacity 0
    /// are discarded without creating a sequence.
    pub fn insert(&mut self, record: SummaryRecord) -> Option<SummaryRecord> {
        let kind = record.kind();
        let capacity = self.capacities.for_kind(kind);
        if capacity == 0 {
            self.dropped_total += 1;
            return None;
        }
        let sequence = match self.sequences.entry(record.tag.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.order.push(entry.key().clone());
                entry.insert(VecDeque::new())
            }
        };
        sequence.push_back(record);
        if sequence.len() <= capacity {
            return None;
        }
        let victim = EvictionPolicy::for_kind(kind).victim(sequence.len(), &mut *self.rng);
        self.evicted_total += 1;
        sequence.remove(victim)
    }

    /// Retained records for `tag` in surviving order.
    pub fn sequence(&self, tag: &str) -> Option<impl Iterator<Item = &SummaryRecord>> {
        self.sequences.get(tag).map(|sequence| sequence.iter())
    }

    /// Number of retained records for `tag`.
    pub fn len_of(&self, tag: &str) -> usize {
        self.sequences.get(tag).map_or(0, VecDeque::len)
    }

    /// Tags in first-seen order.
    pub fn tags(&self) -> &[String] {
        &self.order
    }

    /// Total retained records across all tags.
    pub fn len(&self) -> usize {
        self.sequences.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records removed by eviction since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Records discarded because their kind has capacity 0.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Drains the buffer: tags in first-seen order, records in surviving order.
    pub fn flush_in_order(self) -> Flush {
        Flush {
            tags: self.order.into_iter(),
            sequences: self.sequences,
            current: None,
        }
    }
}

/// Draining iterator returned by [`RetentionBuffer::flush_in_order`].
pub struct Flush {
    tags: std::vec::IntoIter<String>,
    sequences: HashMap<String, VecDeque<SummaryRecord>>,
    current: Option<(String, VecDeque<SummaryRecord>)>,
}

impl Iterator for Flush {
    type Item = (String, SummaryRecord);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((tag, sequence)) = self.current.as_mut() {
                if let Some(record) = sequence.pop_front() {
                    return Some((tag.clone(), record));
                }
            }
            let tag = self.tags.next()?;
            let sequence = self.sequences.remove(&tag).unwrap_or_default();
            self.current = Some((tag, sequence));
        }
    }
}
