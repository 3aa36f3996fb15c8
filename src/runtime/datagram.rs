//! Stateless UDP chargen.
//!
//! Every request datagram gets exactly one reply holding a random-length
//! prefix of the pattern. Nothing is remembered about the peer.

use crate::error::Fatal;
use crate::pattern::Pattern;
use rand::Rng;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::debug;

/// Answer one pending datagram on `socket`.
///
/// Returns the peer and reply length, or `None` if no datagram was waiting
/// or the reply could not be sent without blocking.
pub fn respond<R: Rng>(
    socket: &UdpSocket,
    pattern: &Pattern,
    scratch: &mut [u8],
    rng: &mut R,
    max_datagram: usize,
) -> Result<Option<(SocketAddr, usize)>, Fatal> {
    let (received, peer) = match socket.recv_from(scratch) {
        Ok(pair) => pair,
        Err(e) if is_transient(&e) => return Ok(None),
        Err(e) => return Err(Fatal::new("recvfrom", e)),
    };

    let len = rng.gen_range(0..=max_datagram);
    match socket.send_to(pattern.prefix(len), peer) {
        Ok(sent) => {
            debug!(peer = %peer, received, sent, "Datagram answered");
            Ok(Some((peer, sent)))
        }
        Err(e) if is_transient(&e) => {
            debug!(peer = %peer, error = %e, "Datagram reply dropped");
            Ok(None)
        }
        Err(e) => Err(Fatal::new("sendto", e)),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
