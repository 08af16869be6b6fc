use core::result;

use thiserror::Error;

/// A helper type for wrapping a [result::Result] such that we can reduce noise in our signatures.
pub type Result<T> = result::Result<T, Error>;

/// The failure taxonomy surfaced through endpoint completion callbacks.
///
/// Orderly peer shutdown is not an error: it is reported as a successful read
/// of zero bytes, so that the protocol layer above can interpret it.
#[derive(Debug, Error)]
pub enum Error {
    /// A socket-level transport failure, e.g. connection reset or refused.
    #[error("transport I/O failure: {0}")]
    Io(
        #[source]
        #[from]
        std::io::Error,
    ),

    /// The operation was aborted because the endpoint was torn down while it
    /// was still in flight. Distinct from [Error::Io] so callers can tell a
    /// local teardown apart from a genuine transport failure.
    #[error("operation cancelled by endpoint teardown")]
    Cancelled,

    /// The socket handle was already shut down when the operation would have
    /// been issued. Surfaces when an internal continuation (read accumulation
    /// or a partial-write re-issue) finds the endpoint torn down before it
    /// could re-arm.
    #[error("socket handle already shut down")]
    Closed,

    /// The memory quota could not satisfy a buffer allocation.
    #[error("memory quota exhausted (requested {requested} bytes)")]
    QuotaExhausted { requested: usize },
}

impl Error {
    /// Map a raw OS result into the taxonomy. `ECANCELED` is how the
    /// completion ring reports an async cancel, so it becomes [Error::Cancelled];
    /// everything else stays a transport error.
    pub(crate) fn from_os(err: std::io::Error) -> Error {
        if err.raw_os_error() == Some(nix::libc::ECANCELED) {
            Error::Cancelled
        } else {
            Error::Io(err)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
