use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{connect, socket, AddressFamily, SockFlag, SockType, SockaddrStorage};

pub(super) fn client_socket(addr: SocketAddr) -> io::Result<OwnedFd> {
    let family = if addr.is_ipv4() {
        AddressFamily::Inet
    } else {
        AddressFamily::Inet6
    };

    socket(family, SockType::Stream, SockFlag::empty(), None).map_err(io::Error::from)
}

/// Create a stream socket and connect it to `addr`, blocking until the
/// handshake finishes. Connection establishment stays off the completion
/// ring; the overlapped machinery only ever sees connected descriptors.
pub(super) fn connect_stream(addr: SocketAddr) -> io::Result<OwnedFd> {
    let fd = client_socket(addr)?;
    let sockaddr = SockaddrStorage::from(addr);
    connect(fd.as_raw_fd(), &sockaddr)?;
    Ok(fd)
}
