use std::io;
use std::path::Path;

use crate::entry::TxnId;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error kinds. I/O failures inside flush and compaction jobs are
/// retried by the scheduler; corruption on the read path poisons only the
/// affected key, corruption during manifest replay refuses to open.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    IoFailure(#[from] io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("too many open files")]
    TooManyOpenFiles,

    #[error("corrupt block: {0}")]
    CorruptBlock(&'static str),

    #[error("corrupt footer: {0}")]
    CorruptFooter(&'static str),

    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("key too large: {0} bytes")]
    KeyTooLarge(usize),

    #[error("value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("unknown transaction: {0}")]
    TransactionUnknown(TxnId),

    #[error("engine shut down while write was waiting for flush")]
    BackPressureShutdown,
}

const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

impl Error {
    /// Classify an error from `File::open`. Exhausted descriptor tables are
    /// surfaced as their own kind so readers can back off and retry.
    pub(crate) fn from_open(err: io::Error, path: &Path) -> Error {
        match err.raw_os_error() {
            Some(EMFILE) | Some(ENFILE) => Error::TooManyOpenFiles,
            _ if err.kind() == io::ErrorKind::NotFound => {
                Error::FileNotFound(path.display().to_string())
            }
            _ => Error::IoFailure(err),
        }
    }
}
