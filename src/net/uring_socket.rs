use std::cmp::Ordering;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use io_uring::{opcode, squeue, types};
use nix::sys::socket::{shutdown, Shutdown};
use tracing::warn;

use crate::driver::{self, UringOp};
use crate::ptr::{SendPtr, SendPtrMut};
use crate::socket::{CompletionTarget, Direction, SocketHandle};

use super::{addr, socket};

fn map_result(result: i32) -> io::Result<usize> {
    match result.cmp(&0) {
        Ordering::Less => Err(io::Error::from_raw_os_error(-result)),
        Ordering::Equal | Ordering::Greater => Ok(result as usize),
    }
}

struct RecvOp {
    fd: RawFd,
    buf: SendPtrMut<u8>,
    len: u32,
    target: Arc<dyn CompletionTarget>,
}

impl UringOp for RecvOp {
    fn entry(&mut self) -> squeue::Entry {
        opcode::Recv::new(types::Fd(self.fd), self.buf.as_ptr(), self.len).build()
    }

    fn complete(self: Box<Self>, result: i32) {
        let RecvOp { target, .. } = *self;
        target.complete(Direction::Read, map_result(result));
    }
}

struct SendOp {
    fd: RawFd,
    buf: SendPtr<u8>,
    len: u32,
    target: Arc<dyn CompletionTarget>,
}

impl UringOp for SendOp {
    fn entry(&mut self) -> squeue::Entry {
        opcode::Send::new(types::Fd(self.fd), self.buf.as_ptr(), self.len).build()
    }

    fn complete(self: Box<Self>, result: i32) {
        let SendOp { target, .. } = *self;
        target.complete(Direction::Write, map_result(result));
    }
}

/// A connected stream socket whose overlapped operations run on the
/// process-wide completion ring. The descriptor closes when the handle
/// drops, which the owning lifetime anchor defers until every pending
/// operation has delivered its completion.
pub struct UringSocket {
    fd: OwnedFd,
    peer: SocketAddr,
    local: SocketAddr,
}

impl UringSocket {
    /// Connect to `addr` and return a handle ready for overlapped I/O.
    pub fn connect(addr: SocketAddr) -> io::Result<UringSocket> {
        socket::connect_stream(addr).and_then(UringSocket::from_fd)
    }

    /// Wrap an already-connected descriptor, e.g. one produced by an
    /// acceptor elsewhere in the process.
    pub fn from_fd(fd: OwnedFd) -> io::Result<UringSocket> {
        let local = addr::local_addr(fd.as_raw_fd())?;
        let peer = addr::peer_addr(fd.as_raw_fd())?;
        Ok(UringSocket { fd, peer, local })
    }
}

impl SocketHandle for UringSocket {
    fn start_read(&self, buf: SendPtrMut<u8>, len: usize, target: Arc<dyn CompletionTarget>) {
        driver::handle().submit(Box::new(RecvOp {
            fd: self.fd.as_raw_fd(),
            buf,
            len: len as u32,
            target,
        }));
    }

    fn start_write(&self, buf: SendPtr<u8>, len: usize, target: Arc<dyn CompletionTarget>) {
        driver::handle().submit(Box::new(SendOp {
            fd: self.fd.as_raw_fd(),
            buf,
            len: len as u32,
            target,
        }));
    }

    fn shutdown(&self) {
        driver::handle().cancel_fd(self.fd.as_raw_fd());
        // Half-close as well, so an operation the cancel raced past still
        // unblocks promptly instead of waiting on the peer.
        if let Err(e) = shutdown(self.fd.as_raw_fd(), Shutdown::Both) {
            warn!(error = %e, fd = self.fd.as_raw_fd(), "socket shutdown failed");
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}
