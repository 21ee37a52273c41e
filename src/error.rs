//! Error taxonomy for port operations.
//!
//! Queue-level full/empty conditions are not errors: they are absorbed into
//! partial-transfer counts by the dispatcher. Only genuinely invalid calls or
//! aborted waits surface here.

use thiserror::Error;

/// Errors surfaced by port operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    /// Malformed or out-of-range parameter; the caller must fix the input.
    #[error("bad argument")]
    BadArgument,

    /// A non-blocking acquire hit a port another handle already holds.
    #[error("port is held by another session")]
    ExclusiveAccess,

    /// Operation on a port without an acquired session.
    #[error("port is not open")]
    NotOpen,

    /// The device departed; terminal for this session, only release is valid.
    #[error("device is offline")]
    Offline,

    /// A blocking wait timed out. Recoverable; the caller decides whether to
    /// retry.
    #[error("wait timed out")]
    Timeout,

    /// A blocking wait was cancelled. A hard stop, not a retry.
    #[error("wait interrupted")]
    Interrupted,
}

/// A data-transfer failure that still moved some bytes.
///
/// `enqueue_data`/`dequeue_data` report progress even on error paths: bytes
/// already copied stay copied, and `transferred` says how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{source} after transferring {transferred} bytes")]
pub struct TransferError {
    pub transferred: usize,
    #[source]
    pub source: PortError,
}

impl TransferError {
    pub(crate) fn new(transferred: usize, source: PortError) -> Self {
        Self {
            transferred,
            source,
        }
    }
}

impl From<PortError> for TransferError {
    fn from(source: PortError) -> Self {
        Self {
            transferred: 0,
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type PortResult<T> = Result<T, PortError>;
