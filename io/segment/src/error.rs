use block_cache::FillFailure;
use io_continuation::{Canceled, WaitError};
use std::io;
use std::sync::Arc;

/// Coarse classification of a [`ReadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadArgument,
    Io,
    OperationTimeout,
    NotSupported,
    Corrupted,
}

/// Errors from the read path.
///
/// Cloneable so one failed fetch can be reported to every request that
/// overlaps it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadError {
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("io error: {0}")]
    Io(Arc<io::Error>),
    #[error("timed out before the read was issued")]
    OperationTimeout,
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadArgument(_) => ErrorKind::BadArgument,
            Self::Io(_) => ErrorKind::Io,
            Self::OperationTimeout => ErrorKind::OperationTimeout,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Corrupted(_) => ErrorKind::Corrupted,
        }
    }

    /// Error for a caller that waited on another caller's failed fetch.
    pub(crate) fn from_fill(failure: FillFailure) -> Self {
        match failure {
            FillFailure::Io => Self::Io(Arc::new(io::Error::other(failure.to_string()))),
            FillFailure::Timeout => Self::OperationTimeout,
            FillFailure::Corrupted => Self::Corrupted(failure.to_string()),
            FillFailure::Canceled => Self::Io(Arc::new(io::Error::new(
                io::ErrorKind::Interrupted,
                failure.to_string(),
            ))),
        }
    }

    /// How waiters on the same block learn about this error.
    pub(crate) fn fill_failure(&self) -> FillFailure {
        match self.kind() {
            ErrorKind::OperationTimeout => FillFailure::Timeout,
            ErrorKind::Corrupted => FillFailure::Corrupted,
            _ => FillFailure::Io,
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<Canceled> for ReadError {
    fn from(e: Canceled) -> Self {
        Self::Io(Arc::new(io::Error::new(io::ErrorKind::Interrupted, e)))
    }
}

impl From<WaitError> for ReadError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Canceled => Canceled.into(),
            WaitError::WouldDeadlock => {
                Self::NotSupported("blocking read from a thread of the completing executor")
            }
        }
    }
}

impl From<ReadError> for io::Error {
    fn from(e: ReadError) -> Self {
        let kind = match &e {
            ReadError::Io(inner) => inner.kind(),
            ReadError::BadArgument(_) => io::ErrorKind::InvalidInput,
            ReadError::OperationTimeout => io::ErrorKind::TimedOut,
            ReadError::NotSupported(_) => io::ErrorKind::Unsupported,
            ReadError::Corrupted(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

/// Result type for the read path.
pub type ReadResult<T> = Result<T, ReadError>;
