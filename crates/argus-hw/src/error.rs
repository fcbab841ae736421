//! Hardware adapter errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unparsable reading {value:?} from {path}")]
    Parse { path: PathBuf, value: String },

    #[error("Channel {channel} out of range (0..{count})")]
    ChannelOutOfRange { channel: u32, count: usize },

    #[error("Read {got} channel values, expected {expected}")]
    ShortRead { expected: usize, got: usize },
}

impl HwError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type HwResult<T> = Result<T, HwError>;
