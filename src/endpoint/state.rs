use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::Error;
use crate::executor::Executor;
use crate::ptr::{SendPtr, SendPtrMut};
use crate::socket::{CompletionTarget, Direction, SocketHandle};

use super::closure::{IoClosure, PrimedRead, PrimedWrite};

/// The lifetime anchor for everything that must outlive the [super::Endpoint].
///
/// Once an endpoint is dropped there may still be overlapped operations the
/// OS is tracking against the socket. Each such operation holds an `Arc`
/// share of this state (handed to the socket as its completion target), so
/// the state, and the socket handle it exclusively owns, is destroyed only
/// when the endpoint has released its share *and* the last pending
/// completion's callback has returned. The descriptor therefore can never be
/// closed while the kernel might still write into an operation's buffer.
pub(crate) struct AsyncIoState {
    socket: Box<dyn SocketHandle>,
    executor: Arc<dyn Executor>,
    read: IoClosure<PrimedRead>,
    write: IoClosure<PrimedWrite>,
    endpoint_alive: AtomicBool,
}

impl AsyncIoState {
    pub(crate) fn new(socket: Box<dyn SocketHandle>, executor: Arc<dyn Executor>) -> Arc<AsyncIoState> {
        Arc::new(AsyncIoState {
            socket,
            executor,
            read: IoClosure::new("read"),
            write: IoClosure::new("write"),
            endpoint_alive: AtomicBool::new(true),
        })
    }

    /// Arm the read closure and start an overlapped receive into the unfilled
    /// tail of the operation's buffer. The buffer's heap block stays put
    /// inside the primed slot, keeping the submitted pointer valid.
    ///
    /// If the endpoint has already been torn down the receive is not armed
    /// and the callback fires with [Error::Closed]. A continuation holds the
    /// slot idle between its completion and the re-arm, so teardown in that
    /// window finds nothing to cancel; the checks here keep the callback on
    /// a delivery path anyway.
    pub(crate) fn issue_read(self: &Arc<Self>, mut op: PrimedRead) {
        if !self.endpoint_alive() {
            (op.cb)(Err(Error::Closed));
            return;
        }
        let len = op.buf.capacity() - op.filled;
        let ptr = unsafe { SendPtrMut::new(op.buf.spare_ptr(op.filled)) };
        self.read.prime(op);
        self.socket
            .start_read(ptr, len, self.clone() as Arc<dyn CompletionTarget>);
        if !self.endpoint_alive() {
            // Teardown interleaved between the liveness check and the arm
            // saw an idle slot and skipped cancellation; request it here.
            self.socket.shutdown();
        }
    }

    /// Arm the write closure and start an overlapped send of the next chunk,
    /// capped by the operation's negotiated chunk size. Same teardown checks
    /// as [AsyncIoState::issue_read].
    pub(crate) fn issue_write(self: &Arc<Self>, op: PrimedWrite) {
        if !self.endpoint_alive() {
            (op.cb)(Err(Error::Closed));
            return;
        }
        let remaining = op.buf.len() - op.sent;
        let chunk = remaining.min(op.chunk_cap);
        let ptr = unsafe { SendPtr::new(op.buf.ptr_at(op.sent)) };
        self.write.prime(op);
        self.socket
            .start_write(ptr, chunk, self.clone() as Arc<dyn CompletionTarget>);
        if !self.endpoint_alive() {
            self.socket.shutdown();
        }
    }

    /// Called when the endpoint is dropped. Pending operations are cancelled
    /// best-effort; their callbacks still fire once the OS lets go. With
    /// nothing pending, dropping the endpoint's share is already the last
    /// release and the socket closes immediately.
    pub(crate) fn endpoint_closed(&self) {
        self.endpoint_alive.store(false, Ordering::Release);
        if self.read.is_primed() || self.write.is_primed() {
            debug!("endpoint dropped with I/O outstanding, requesting cancellation");
            self.socket.shutdown();
        }
    }

    fn endpoint_alive(&self) -> bool {
        self.endpoint_alive.load(Ordering::Acquire)
    }

    /// Map a failed operation's OS error to the caller-visible taxonomy.
    /// After teardown, failures induced by our own cancel/half-close are
    /// reported as [Error::Cancelled]; anything else keeps its identity so a
    /// real transport failure racing teardown is not masked.
    fn terminal_error(&self, err: io::Error) -> Error {
        let mapped = Error::from_os(err);
        if self.endpoint_alive() {
            return mapped;
        }
        match mapped {
            Error::Io(ref io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
                ) =>
            {
                Error::Cancelled
            }
            other => other,
        }
    }

    fn fire_read(self: &Arc<Self>, result: io::Result<usize>) {
        let Some(mut op) = self.read.take() else {
            return;
        };
        match result {
            Ok(0) => {
                // Zero bytes is the peer's orderly close, unless it is the
                // echo of our own teardown half-close.
                if op.filled == 0 && !self.endpoint_alive() {
                    (op.cb)(Err(Error::Cancelled));
                } else {
                    op.buf.set_len(op.filled);
                    (op.cb)(Ok(op.buf));
                }
            }
            Ok(n) => {
                op.filled += n;
                if op.filled >= op.target_len || op.filled == op.buf.capacity() {
                    op.buf.set_len(op.filled);
                    (op.cb)(Ok(op.buf));
                } else {
                    trace!(filled = op.filled, want = op.target_len, "short read, re-arming");
                    self.issue_read(op);
                }
            }
            Err(e) => (op.cb)(Err(self.terminal_error(e))),
        }
    }

    fn fire_write(self: &Arc<Self>, result: io::Result<usize>) {
        let Some(mut op) = self.write.take() else {
            return;
        };
        match result {
            Ok(n) => {
                op.sent += n;
                if op.sent >= op.buf.len() {
                    (op.cb)(Ok(()));
                    return;
                }
                if n == 0 {
                    op.stalls += 1;
                    if op.stalls >= op.stall_limit {
                        (op.cb)(Err(Error::Io(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "send made no progress",
                        ))));
                        return;
                    }
                } else {
                    op.stalls = 0;
                }
                trace!(sent = op.sent, total = op.buf.len(), "partial send, continuing");
                self.issue_write(op);
            }
            Err(e) => (op.cb)(Err(self.terminal_error(e))),
        }
    }
}

impl CompletionTarget for AsyncIoState {
    /// Hand the fire step to the executor. The job owns this `Arc`
    /// (the pending operation's share of the state) until the user callback
    /// has returned, which is exactly the window during which the socket must
    /// stay open.
    fn complete(self: Arc<Self>, dir: Direction, result: io::Result<usize>) {
        let executor = self.executor.clone();
        executor.run(Box::new(move || match dir {
            Direction::Read => self.fire_read(result),
            Direction::Write => self.fire_write(result),
        }));
    }
}
