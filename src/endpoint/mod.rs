//! The public endpoint abstraction: a connected socket exposing overlapped
//! [Endpoint::read] and [Endpoint::write] with completion callbacks.
//!
//! The endpoint itself is freely destructible at any time, including with
//! operations in flight; the async I/O state anchor it shares with every
//! pending operation keeps the socket and the per-direction closures alive
//! until the last completion has been delivered. Callbacks are never
//! invoked inline: even a synchronously satisfiable operation is delivered
//! through the executor, keeping a single completion path.

mod closure;
mod state;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::experiments;
use crate::memory::{Buffer, MemoryAllocator};
use crate::socket::SocketHandle;

use closure::{PrimedRead, PrimedWrite};
use state::AsyncIoState;

/// Per-read tuning passed by the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct ReadArgs {
    /// Estimated size of the next inbound RPC frame. Consulted only when the
    /// `frame_size_estimation` experiment is enabled, in which case the read
    /// buffer is sized to it and the read completes once it is satisfied.
    pub frame_size_hint: Option<usize>,
}

/// Per-write tuning passed by the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct WriteArgs {
    /// Explicit outbound chunk cap for this write, overriding the endpoint's
    /// recorded peer frame size. Consulted only when the `peer_framing`
    /// experiment is enabled.
    pub max_frame_size: Option<usize>,
}

/// One side of a connected byte stream, driving overlapped reads and writes
/// on behalf of the transport layer.
///
/// Not cloneable: an endpoint is an identity object and its owner is the
/// single issuer of operations. At most one read and one write may be in
/// flight at a time; issuing a second operation in the same direction is a
/// usage error and panics.
pub struct Endpoint {
    peer: SocketAddr,
    local: SocketAddr,
    allocator: MemoryAllocator,
    config: EndpointConfig,
    peer_frame_size: AtomicUsize,
    state: Arc<AsyncIoState>,
}

impl Endpoint {
    /// Wrap an already-connected socket. Addresses are captured here and stay
    /// valid for the endpoint's whole lifetime.
    pub fn new(
        socket: Box<dyn SocketHandle>,
        allocator: MemoryAllocator,
        config: EndpointConfig,
        executor: Arc<dyn Executor>,
    ) -> Endpoint {
        let peer = socket.peer_addr();
        let local = socket.local_addr();
        Endpoint {
            peer,
            local,
            allocator,
            config,
            peer_frame_size: AtomicUsize::new(0),
            state: AsyncIoState::new(socket, executor),
        }
    }

    /// Request newly received bytes. `on_done` fires exactly once, on an
    /// executor thread: `Ok` with the filled buffer on success (zero bytes
    /// means the peer closed in an orderly way), `Err` on transport failure
    /// or teardown cancellation.
    ///
    /// `buffer` is used as the destination if it is large enough for the
    /// desired read size; otherwise a fresh buffer is drawn from the
    /// endpoint's allocator. An `Err` return means the operation was never
    /// armed and `on_done` will not fire.
    ///
    /// Panics if a read is already outstanding.
    pub fn read<F>(&self, buffer: Buffer, args: &ReadArgs, on_done: F) -> Result<()>
    where
        F: FnOnce(Result<Buffer>) + Send + 'static,
    {
        let desired = self.desired_read_size(args);
        let buf = if buffer.capacity() < desired {
            self.allocator.allocate(desired)?
        } else {
            buffer
        };
        let target_len = self.read_target_len(args, buf.capacity());

        debug!(
            peer = %self.peer,
            capacity = buf.capacity(),
            target_len,
            "arming overlapped read"
        );
        self.state.issue_read(PrimedRead {
            buf,
            filled: 0,
            target_len,
            cb: Box::new(on_done),
        });
        Ok(())
    }

    /// Send `data` to the peer. `on_done` fires exactly once, on an executor
    /// thread, with `Ok(())` only after every byte has been accepted by the
    /// OS; partial sends are continued internally, so callers never resume a
    /// write themselves.
    ///
    /// Panics if a write is already outstanding.
    pub fn write<F>(&self, data: Buffer, args: &WriteArgs, on_done: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if data.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty write",
            )));
        }

        let chunk_cap = self.outbound_chunk_cap(args);
        debug!(peer = %self.peer, bytes = data.len(), chunk_cap, "arming overlapped write");
        self.state.issue_write(PrimedWrite {
            buf: data,
            sent: 0,
            chunk_cap,
            stalls: 0,
            stall_limit: self.config.stalled_write_limit,
            cb: Box::new(on_done),
        });
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Record the frame size most recently advertised by the peer. With the
    /// `peer_framing` experiment enabled, subsequent writes cap their chunks
    /// at this value as a proxy for the peer's memory pressure.
    pub fn record_peer_frame_size(&self, bytes: usize) {
        self.peer_frame_size.store(bytes, Ordering::Relaxed);
    }

    fn desired_read_size(&self, args: &ReadArgs) -> usize {
        if experiments::is_enabled(experiments::FRAME_SIZE_ESTIMATION) {
            if let Some(hint) = args.frame_size_hint {
                return hint.max(1);
            }
        }
        self.config.default_read_size
    }

    /// How many bytes must accumulate before the read completes. Flags are
    /// read here, once per armed operation.
    fn read_target_len(&self, args: &ReadArgs, capacity: usize) -> usize {
        let estimated = experiments::is_enabled(experiments::FRAME_SIZE_ESTIMATION)
            .then_some(args.frame_size_hint)
            .flatten();
        let target = match estimated {
            Some(hint) => hint,
            None if experiments::is_enabled(experiments::READ_LOW_WATERMARK) => {
                self.config.read_low_watermark
            }
            None => 1,
        };
        target.clamp(1, capacity)
    }

    fn outbound_chunk_cap(&self, args: &WriteArgs) -> usize {
        if experiments::is_enabled(experiments::PEER_FRAMING) {
            let advertised = args
                .max_frame_size
                .unwrap_or_else(|| self.peer_frame_size.load(Ordering::Relaxed));
            if advertised > 0 {
                return advertised.min(self.config.max_outbound_frame);
            }
        }
        self.config.max_outbound_frame
    }
}

impl Drop for Endpoint {
    /// Never blocks. Pending operations are cancelled best-effort and their
    /// callbacks still fire; the shared state (and the socket) outlives the
    /// endpoint until the last of them has been delivered.
    fn drop(&mut self) {
        self.state.endpoint_closed();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("peer", &self.peer)
            .field("local", &self.local)
            .finish()
    }
}
