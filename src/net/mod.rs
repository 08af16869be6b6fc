//! Platform socket plumbing: descriptor creation and connection via [nix],
//! address lookup helpers, and [UringSocket], the [crate::socket::SocketHandle]
//! implementation that submits overlapped receives and sends to the
//! process-wide completion ring.

mod addr;
mod socket;
mod uring_socket;

pub use uring_socket::UringSocket;
