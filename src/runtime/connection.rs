//! Client connections and their lifecycle.
//!
//! A client owns its stream from accept to disconnect. The only per-client
//! state is the pair of byte counters; the position in the outgoing pattern
//! is derived from the transmit counter.

use super::listener::Listener;
use super::registry::{Interest, Registry};
use crate::error::{Fatal, OrFatal};
use crate::pattern::Pattern;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info};

/// Registry entry: a listening socket or a connected client.
#[derive(Debug)]
pub enum Slot {
    Listener(Listener),
    Client(Client),
}

impl AsRawFd for Slot {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Slot::Listener(listener) => listener.as_raw_fd(),
            Slot::Client(client) => client.stream.as_raw_fd(),
        }
    }
}

/// Outcome of one non-blocking transfer attempt.
#[derive(Debug)]
pub enum Transfer {
    /// Bytes moved; may be fewer than offered.
    Done(usize),
    /// Would block or interrupted by a signal; try again on the next readiness.
    Retry,
    /// Peer is gone (EOF, reset or broken pipe).
    Closed,
    /// Anything else.
    Failed(io::Error),
}

/// Counters snapshot for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub peer: SocketAddr,
    pub rx: u64,
    pub tx: u64,
}

/// A connected TCP client.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    rx: u64,
    tx: u64,
}

impl Client {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            rx: 0,
            tx: 0,
        }
    }

    #[cfg(test)]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            peer: self.peer,
            rx: self.rx,
            tx: self.tx,
        }
    }

    /// Read and discard whatever the peer sent, counting it.
    pub fn receive(&mut self, scratch: &mut [u8]) -> Transfer {
        match self.stream.read(scratch) {
            Ok(0) => Transfer::Closed,
            Ok(n) => {
                self.rx += n as u64;
                Transfer::Done(n)
            }
            Err(e) => classify(e),
        }
    }

    /// Offer the rest of the current pattern period to the peer.
    pub fn transmit(&mut self, pattern: &Pattern) -> Transfer {
        match self.stream.write(pattern.window(self.tx)) {
            Ok(n) => {
                self.tx += n as u64;
                Transfer::Done(n)
            }
            Err(e) => classify(e),
        }
    }
}

fn classify(e: io::Error) -> Transfer {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Transfer::Retry,
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Transfer::Closed,
        _ => Transfer::Failed(e),
    }
}

impl Registry<Slot> {
    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.iter()
            .filter(|slot| matches!(slot, Slot::Client(_)))
            .count()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.iter().filter_map(|slot| match slot {
            Slot::Client(client) => Some(client),
            Slot::Listener(_) => None,
        })
    }
}

/// Accept one pending connection on the TCP listener at `index`.
///
/// Returns the index of the new client, or `None` when nothing was ready
/// after all. Any other accept failure is fatal.
pub fn accept_connection(
    registry: &mut Registry<Slot>,
    index: usize,
) -> Result<Option<usize>, Fatal> {
    let accepted = match registry.get(index) {
        Some(Slot::Listener(Listener::Tcp(listener))) => listener.accept(),
        _ => return Ok(None),
    };

    let (stream, peer) = match accepted {
        Ok(pair) => pair,
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            debug!(error = %e, "Accept deferred");
            return Ok(None);
        }
        Err(e) => return Err(Fatal::new("accept", e)),
    };

    stream.set_nonblocking(true).or_fatal("fcntl")?;
    let client = Client::new(stream, peer);
    let index = registry
        .add(Slot::Client(client), Interest::READABLE | Interest::WRITABLE)
        .or_fatal("realloc")?;

    info!(peer = %peer, clients = registry.client_count(), "Client connected");
    Ok(Some(index))
}

/// Close the client at `index` and drop its entry.
///
/// The former last entry takes over `index`, so the caller must visit it
/// again.
pub fn disconnect_connection(registry: &mut Registry<Slot>, index: usize) {
    let stats = match registry.get(index) {
        Some(Slot::Client(client)) => client.stats(),
        _ => return,
    };
    drop(registry.remove(index));

    info!(
        peer = %stats.peer,
        rx = stats.rx,
        tx = stats.tx,
        clients = registry.client_count(),
        "Client disconnected"
    );
}
