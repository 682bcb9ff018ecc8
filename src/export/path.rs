use crate::event_file::EVENTS_FILE_PREFIX;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Run name used when the event file sits directly in the import root.
pub const UNTITLED_RUN_NAME: &str = "untitled-tensorboard";

/// Longest custom run id the tracking backend accepts.
pub const CUSTOM_RUN_ID_LEN: usize = 32;

/// De-duplication key of an event file: hex SHA-256 of its path string,
/// truncated to [`CUSTOM_RUN_ID_LEN`]. Content is not hashed.
pub fn custom_run_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(CUSTOM_RUN_ID_LEN);
    encoded
}

/// Parent directory of `relative`, or [`UNTITLED_RUN_NAME`].
pub fn run_name(relative: &Path) -> String {
    relative
        .parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNTITLED_RUN_NAME.to_string())
}

/// Hostname embedded in `events.out.tfevents.<timestamp>.<hostname>`.
pub fn hostname(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let suffix = file_name.strip_prefix(EVENTS_FILE_PREFIX)?;
    let (_, host) = suffix.split_once('.')?;
    Some(host.to_string())
}
