//! Reading and writing TensorBoard event files.

pub mod decode;
pub mod proto;
pub mod reader;
pub mod record;
pub mod writer;

pub use decode::{decode_event, decode_summary_bytes, DecodeError, DecodedValue};
pub use reader::{first_event_timestamp, is_valid_event_file, EventFileReader, FileReadError};
pub use record::{masked_crc32c, write_record, FrameError, RecordReader, MAX_RECORD_BYTES};
pub use writer::{wall_time_now, EventFileWriter, EVENTS_FILE_PREFIX};
