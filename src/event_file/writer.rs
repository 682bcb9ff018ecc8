use super::proto::{self, Event, Summary};
use super::record::write_record;
use prost::Message;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// File name prefix shared by every TensorBoard event file.
pub const EVENTS_FILE_PREFIX: &str = "events.out.tfevents.";

const FILE_VERSION: &str = "brain.Event:2";

/// Appends framed events to a new file inside a log directory.
pub struct EventFileWriter {
    path: PathBuf,
    output: BufWriter<File>,
}

impl EventFileWriter {
    /// Creates `events.out.tfevents.<secs>.<hostname>` under `log_dir` and
    /// writes the file-version header event.
    pub fn create(log_dir: impl AsRef<Path>, hostname: &str) -> io::Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;
        let now = wall_time_now();
        let base = format!("{EVENTS_FILE_PREFIX}{}.{hostname}", now as u64);
        let (path, file) = create_unique(log_dir, &base)?;
        let mut writer = Self {
            path,
            output: BufWriter::new(file),
        };
        writer.write_event(&Event {
            wall_time: now,
            step: 0,
            what: Some(proto::event::What::FileVersion(FILE_VERSION.to_string())),
        })?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_event(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.output, &event.encode_to_vec())
    }

    /// Wraps `summary` in an event stamped with `step` and `wall_time`.
    pub fn write_summary(&mut self, summary: Summary, step: i64, wall_time: f64) -> io::Result<()> {
        self.write_event(&Event {
            wall_time,
            step,
            what: Some(proto::event::What::Summary(summary)),
        })
    }

    /// Writes a serialized `GraphDef` event.
    pub fn write_graph(&mut self, graph_def: Vec<u8>, wall_time: f64) -> io::Result<()> {
        self.write_event(&Event {
            wall_time,
            step: 0,
            what: Some(proto::event::What::GraphDef(graph_def)),
        })
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

impl Drop for EventFileWriter {
    fn drop(&mut self) {
        let _ = self.output.flush();
    }
}

/// Seconds since the Unix epoch as a float, the event wall-time unit.
pub fn wall_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

fn create_unique(dir: &Path, base: &str) -> io::Result<(PathBuf, File)> {
    let mut candidate = dir.join(base);
    let mut attempt = 0u32;
    loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                candidate = dir.join(format!("{base}.{attempt}"));
            }
            Err(err) => return Err(err),
        }
    }
}
