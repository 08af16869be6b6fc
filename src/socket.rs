//! The collaborator seams between the endpoint core and the platform I/O
//! layer. [SocketHandle] is what the endpoint drives; [CompletionTarget] is
//! how the platform hands results back. Keeping both as traits lets the
//! integration tests script a socket without a kernel in the loop, and keeps
//! the completion ring ignorant of endpoint lifetimes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::ptr::{SendPtr, SendPtrMut};

/// The direction of an overlapped operation. Read and write are independent:
/// one of each may be in flight on a socket at the same time, but never two
/// of the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Receiver of overlapped completion results.
///
/// The `Arc` a socket holds for a pending operation is that operation's share
/// of the target's lifetime: as long as the OS may still touch the buffer,
/// the target (and everything it owns) stays alive. `complete` consumes the
/// share, and must only be called once the OS is finished with the operation.
pub trait CompletionTarget: Send + Sync {
    /// Deliver the final result: bytes transferred on success, the OS error
    /// otherwise. Invoked exactly once per started operation, from any thread.
    fn complete(self: Arc<Self>, dir: Direction, result: io::Result<usize>);
}

/// One connected, bidirectional streaming socket exposing overlapped
/// primitives. Implementations must guarantee that every started operation
/// eventually reaches its [CompletionTarget], even when [SocketHandle::shutdown]
/// is called while the operation is pending; a dropped completion strands a
/// callback and leaks whatever the caller tied to it.
pub trait SocketHandle: Send + Sync {
    /// Start an overlapped receive into `buf[..len]`. Returns immediately;
    /// the result arrives through `target`.
    fn start_read(&self, buf: SendPtrMut<u8>, len: usize, target: Arc<dyn CompletionTarget>);

    /// Start an overlapped send of `buf[..len]`. Returns immediately; the
    /// result (bytes accepted by the OS, possibly short) arrives through
    /// `target`.
    fn start_write(&self, buf: SendPtr<u8>, len: usize, target: Arc<dyn CompletionTarget>);

    /// Best-effort cancellation of pending operations. Must not close the
    /// underlying descriptor (pending completions still reference it) and
    /// must leave every pending operation on a path to completion.
    fn shutdown(&self);

    fn peer_addr(&self) -> SocketAddr;

    fn local_addr(&self) -> SocketAddr;
}
