//! TFRecord framing: `len: u64 LE | crc(len): u32 | data | crc(data): u32`.

use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;

const MASK_DELTA: u32 = 0xa282_ead8;
const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 4;

/// Masked CRC-32C as used by TFRecord files.
pub fn masked_crc32c(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("length checksum mismatch at offset {offset}")]
    LengthChecksum { offset: u64 },
    #[error("payload checksum mismatch at offset {offset}")]
    PayloadChecksum { offset: u64 },
    #[error("record at offset {offset} declares {len} bytes, above the {max} byte limit")]
    Oversized { offset: u64, len: u64, max: u64 },
}

/// Largest record the reader accepts; protects against garbage lengths.
pub const MAX_RECORD_BYTES: u64 = 256 << 20;

/// Reads framed records from an underlying reader.
pub struct RecordReader<R> {
    input: R,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, offset: 0 }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the next payload, or `None` at end of input.
    ///
    /// A record cut off mid-way (a writer that is still running or crashed)
    /// is treated as end of input.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        if !read_full(&mut self.input, &mut header)? {
            return Ok(None);
        }
        let len_bytes = &header[..8];
        let expected_len_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if masked_crc32c(len_bytes) != expected_len_crc {
            return Err(FrameError::LengthChecksum {
                offset: self.offset,
            });
        }
        let mut len_raw = [0u8; 8];
        len_raw.copy_from_slice(len_bytes);
        let len = u64::from_le_bytes(len_raw);
        if len > MAX_RECORD_BYTES {
            return Err(FrameError::Oversized {
                offset: self.offset,
                len,
                max: MAX_RECORD_BYTES,
            });
        }
        let mut payload = vec![0u8; len as usize];
        if !read_full(&mut self.input, &mut payload)? {
            return Ok(None);
        }
        let mut footer = [0u8; FOOTER_LEN];
        if !read_full(&mut self.input, &mut footer)? {
            return Ok(None);
        }
        if masked_crc32c(&payload) != u32::from_le_bytes(footer) {
            return Err(FrameError::PayloadChecksum {
                offset: self.offset,
            });
        }
        self.offset += (HEADER_LEN + FOOTER_LEN) as u64 + len;
        Ok(Some(payload))
    }
}

/// Writes one framed record.
pub fn write_record<W: Write>(output: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = (payload.len() as u64).to_le_bytes();
    output.write_all(&len)?;
    output.write_all(&masked_crc32c(&len).to_le_bytes())?;
    output.write_all(payload)?;
    output.write_all(&masked_crc32c(payload).to_le_bytes())?;
    Ok(())
}

/// Fills `buf` completely; `Ok(false)` when input ends before the buffer is full.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
