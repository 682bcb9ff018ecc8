use super::decode::{decode_event, DecodeError, DecodedValue};
use super::proto::Event;
use super::record::RecordReader;
use prost::Message;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A file that cannot be used as an event stream.
#[derive(Debug, Error)]
pub enum FileReadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} contains no timestamped event")]
    NoTimestamp { path: PathBuf },
}

/// Sequential reader over the events of one file.
///
/// Iteration stops after the first framing or protobuf error because the
/// stream cannot be resynchronised past it.
pub struct EventFileReader<R = BufReader<File>> {
    path: PathBuf,
    records: RecordReader<R>,
    finished: bool,
    events_read: u64,
}

impl EventFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileReadError> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref).map_err(|source| FileReadError::Open {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(path_ref, BufReader::new(file)))
    }
}

impl<R: Read> EventFileReader<R> {
    pub fn from_reader(path: impl Into<PathBuf>, input: R) -> Self {
        Self {
            path: path.into(),
            records: RecordReader::new(input),
            finished: false,
            events_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events successfully decoded so far.
    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Flattens the stream into decoded summary values.
    pub fn values(self) -> impl Iterator<Item = Result<DecodedValue, DecodeError>> {
        self.flat_map(|event| match event {
            Ok(event) => decode_event(&event),
            Err(err) => vec![Err(err)],
        })
    }

    fn read_event(&mut self) -> Result<Option<Event>, DecodeError> {
        let Some(payload) = self.records.next_record()? else {
            return Ok(None);
        };
        let event = Event::decode(payload.as_slice())?;
        self.events_read += 1;
        Ok(Some(event))
    }
}

impl<R: Read> Iterator for EventFileReader<R> {
    type Item = Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Wall time of the first decodable event carrying a timestamp.
pub fn first_event_timestamp(path: impl AsRef<Path>) -> Result<f64, FileReadError> {
    let path_ref = path.as_ref();
    let reader = EventFileReader::open(path_ref)?;
    reader
        .map_while(Result::ok)
        .map(|event| event.wall_time)
        .find(|wall_time| *wall_time > 0.0)
        .ok_or_else(|| FileReadError::NoTimestamp {
            path: path_ref.to_path_buf(),
        })
}

/// True when `path` decodes to at least one timestamped event.
pub fn is_valid_event_file(path: impl AsRef<Path>) -> bool {
    first_event_timestamp(path).is_ok()
}
