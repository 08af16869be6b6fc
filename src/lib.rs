//! # ringpoint
//!
//! A transport-facing asynchronous I/O layer for RPC runtimes: an [Endpoint]
//! abstraction over a connected socket that performs overlapped,
//! completion-driven reads and writes, built on `io_uring`.
//!
//! The hard problem this crate solves is the lifetime hazard inherent to
//! completion-based I/O: the endpoint's owner may drop it at any moment, yet
//! the kernel may still deliver a completion for an operation issued before
//! the drop, into a buffer that had better still exist. The design answers
//! with a reference-counted lifetime anchor shared between the endpoint and
//! every pending operation: the anchor is the only owner of the raw socket,
//! and it is freed only when the endpoint is gone *and* the last outstanding
//! completion's callback has returned. Per-direction continuation slots are
//! allocated once per connection and re-armed per operation, so steady-state
//! reads and writes cost no slot allocation.
//!
//! Callbacks are delivered asynchronously through an [Executor], never
//! inline, and each fires exactly once: success, transport failure, or a
//! distinct cancelled status when the endpoint was torn down mid-operation.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ringpoint::{
//!     Buffer, Endpoint, EndpointConfig, MemoryAllocator, MemoryQuota, ReadArgs, ThreadPool,
//!     UringSocket, WriteArgs,
//! };
//!
//! fn main() -> ringpoint::Result<()> {
//!     let executor = Arc::new(ThreadPool::builder().name_prefix("rpc-io-").create()?);
//!     let quota = MemoryQuota::new(64 << 20);
//!
//!     let socket = UringSocket::connect("127.0.0.1:50051".parse().unwrap())?;
//!     let endpoint = Endpoint::new(
//!         Box::new(socket),
//!         MemoryAllocator::new(quota),
//!         EndpointConfig::default(),
//!         executor,
//!     );
//!
//!     endpoint.write(
//!         Buffer::from_vec(b"ping".to_vec()),
//!         &WriteArgs::default(),
//!         |result| match result {
//!             Ok(()) => println!("request flushed"),
//!             Err(e) => eprintln!("write failed: {e}"),
//!         },
//!     )?;
//!
//!     endpoint.read(Buffer::with_capacity(0), &ReadArgs::default(), |result| {
//!         match result {
//!             Ok(buf) if buf.is_empty() => println!("peer closed"),
//!             Ok(buf) => println!("received {} bytes", buf.len()),
//!             Err(e) => eprintln!("read failed: {e}"),
//!         }
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! Dropping the [Endpoint] never blocks, even with operations in flight;
//! their callbacks are still delivered, with [Error::Cancelled] if teardown
//! aborted them. The [experiments] registry tunes frame sizing and flow
//! control without restarting in-flight operations.

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod experiments;
pub mod memory;
pub mod net;
pub mod ptr;
pub mod socket;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, ReadArgs, WriteArgs};
pub use error::{Error, Result};
pub use executor::{Executor, ThreadPool, ThreadPoolBuilder};
pub use memory::{Buffer, MemoryAllocator, MemoryQuota};
pub use net::UringSocket;
pub use socket::{CompletionTarget, Direction, SocketHandle};
