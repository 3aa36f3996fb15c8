//! Listening socket creation.

use crate::config::Protocol;
use crate::error::{Fatal, OrFatal};
use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

/// A bound socket serving one protocol.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl Listener {
    /// Create, bind and (for TCP) listen on `addr`.
    pub fn bind(protocol: Protocol, addr: SocketAddr, backlog: i32) -> Result<Self, Fatal> {
        match protocol {
            Protocol::Tcp => tcp_listener(addr, backlog).map(Listener::Tcp),
            Protocol::Udp => udp_socket(addr).map(Listener::Udp),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Listener::Tcp(_) => Protocol::Tcp,
            Listener::Udp(_) => Protocol::Udp,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Udp(socket) => socket.local_addr(),
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(listener) => listener.as_raw_fd(),
            Listener::Udp(socket) => socket.as_raw_fd(),
        }
    }
}

/// Create a non-blocking TCP listener.
fn tcp_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, Fatal> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).or_fatal("socket")?;

    socket.set_reuse_address(true).or_fatal("setsockopt")?;
    socket.set_nonblocking(true).or_fatal("fcntl")?;
    socket.bind(&addr.into()).or_fatal("bind")?;
    socket.listen(backlog).or_fatal("listen")?;

    Ok(socket.into())
}

/// Create a non-blocking UDP socket.
fn udp_socket(addr: SocketAddr) -> Result<UdpSocket, Fatal> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None).or_fatal("socket")?;

    socket.set_nonblocking(true).or_fatal("fcntl")?;
    socket.bind(&addr.into()).or_fatal("bind")?;

    Ok(socket.into())
}
