use std::io;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;

use nix::sys::socket::{getpeername, getsockname, SockaddrStorage};

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let addr: SockaddrStorage = getsockname(fd)?;
    to_std(addr)
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let addr: SockaddrStorage = getpeername(fd)?;
    to_std(addr)
}

fn to_std(addr: SockaddrStorage) -> io::Result<SocketAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Ok(SocketAddr::V4(SocketAddrV4::new(v4.ip(), v4.port())));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        return Ok(SocketAddr::V6(SocketAddrV6::new(
            v6.ip(),
            v6.port(),
            v6.flowinfo(),
            v6.scope_id(),
        )));
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "unsupported address family",
    ))
}
