//! Mapping of I/O and decoding failures onto the core error type.

use conveyor_core::Error;
use std::io;
use std::path::Path;

/// A missing file is `NotFound`; any other I/O failure is `Storage`.
pub(crate) fn io_error(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound(path.display().to_string())
    } else {
        Error::Storage(format!("{}: {}", path.display(), err))
    }
}

/// A record that exists but cannot be decoded.
pub(crate) fn decode_error(path: &Path, err: serde_json::Error) -> Error {
    Error::Corrupt(format!("{}: {}", path.display(), err))
}

pub(crate) fn encode_error(err: serde_json::Error) -> Error {
    Error::Internal(format!("failed to encode record: {}", err))
}
