//! poll(2) event loop.
//!
//! Level-triggered readiness model: each iteration waits once over every
//! registered socket, then performs at most one bounded non-blocking
//! operation per ready direction. Anything left over is reported again by
//! the next wait, so interrupted or short operations need no bookkeeping.
//!
//! Per iteration:
//! 1. honour a pending stats request (before any new I/O)
//! 2. wait, retrying when a signal interrupts it
//!
//! The handled signals stay blocked in the loop thread except inside the
//! wait itself, which installs the unblocking mask atomically. A signal that
//! lands between the flag checks and the wait is held pending and interrupts
//! the wait as soon as it starts, so it is never slept through.
//! 3. walk the registry: listeners accept or answer a datagram, clients
//!    handle hangup first, then read, then write

use super::connection::{accept_connection, disconnect_connection, Slot, Transfer};
use super::datagram;
use super::listener::Listener;
use super::registry::{Interest, Readiness, Registry};
use crate::config::Config;
use crate::error::{Fatal, OrFatal};
use crate::pattern::Pattern;
use crate::signals::{BlockedSignals, RuntimeFlags};
use crate::stats;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, Write};
use tracing::{info, warn};

/// What to do after handling the entry at the current index.
enum Step {
    Next,
    /// The entry was removed and the former last entry moved into its index.
    Revisit,
}

/// The chargen server: registry, pattern and scratch space.
pub struct Server {
    registry: Registry<Slot>,
    pattern: Pattern,
    scratch: Vec<u8>,
    rng: StdRng,
    max_datagram: usize,
    report: Box<dyn Write + Send>,
}

impl Server {
    /// Bind a listener for every enabled protocol.
    pub fn bind(config: &Config) -> Result<Self, Fatal> {
        let mut registry = Registry::new();

        for protocol in config.protocols() {
            let listener = Listener::bind(protocol, config.listen_addr(), config.backlog)?;
            let addr = listener.local_addr().or_fatal("getsockname")?;
            info!(protocol = ?listener.protocol(), addr = %addr, "Listening");

            registry
                .add(Slot::Listener(listener), Interest::READABLE)
                .or_fatal("realloc")?;
        }

        let pattern = Pattern::new();
        Ok(Self {
            registry,
            scratch: vec![0; pattern.len()],
            pattern,
            rng: StdRng::from_entropy(),
            max_datagram: config.max_datagram,
            report: Box::new(io::stdout()),
        })
    }

    /// Serve until `flags` asks to stop, then close every socket.
    pub fn run(&mut self, flags: &RuntimeFlags) -> Result<(), Fatal> {
        let signals = BlockedSignals::handled()?;
        info!(pattern_len = self.pattern.len(), "Server started");

        while flags.is_running() {
            if flags.take_listing_request() {
                self.report_stats();
            }

            match self.registry.wait(Some(signals.wait_mask())) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Fatal::new("poll", e)),
            }

            self.dispatch()?;
        }

        self.shutdown();
        Ok(())
    }

    fn dispatch(&mut self) -> Result<(), Fatal> {
        let mut index = 0;

        while index < self.registry.len() {
            let ready = self.registry.readiness(index);
            if ready.is_empty() {
                index += 1;
                continue;
            }

            let step = match self.registry.get(index) {
                Some(Slot::Listener(Listener::Tcp(_))) => {
                    if ready.is_readable() {
                        accept_connection(&mut self.registry, index)?;
                    }
                    Step::Next
                }
                Some(Slot::Listener(Listener::Udp(socket))) => {
                    if ready.is_readable() {
                        datagram::respond(
                            socket,
                            &self.pattern,
                            &mut self.scratch,
                            &mut self.rng,
                            self.max_datagram,
                        )?;
                    }
                    Step::Next
                }
                Some(Slot::Client(_)) => self.serve_client(index, ready)?,
                None => break,
            };

            if let Step::Next = step {
                index += 1;
            }
        }

        Ok(())
    }

    fn serve_client(&mut self, index: usize, ready: Readiness) -> Result<Step, Fatal> {
        if ready.is_hangup() {
            disconnect_connection(&mut self.registry, index);
            return Ok(Step::Revisit);
        }

        let Some(Slot::Client(client)) = self.registry.get_mut(index) else {
            return Ok(Step::Next);
        };

        if ready.is_readable() {
            match client.receive(&mut self.scratch) {
                Transfer::Done(_) | Transfer::Retry => {}
                Transfer::Closed => {
                    disconnect_connection(&mut self.registry, index);
                    return Ok(Step::Revisit);
                }
                Transfer::Failed(e) => return Err(Fatal::new("read", e)),
            }
        }

        if ready.is_writable() {
            match client.transmit(&self.pattern) {
                Transfer::Done(_) | Transfer::Retry => {}
                Transfer::Closed => {
                    disconnect_connection(&mut self.registry, index);
                    return Ok(Step::Revisit);
                }
                Transfer::Failed(e) => return Err(Fatal::new("write", e)),
            }
        }

        Ok(Step::Next)
    }

    fn report_stats(&mut self) {
        let clients = self.registry.clients().map(|client| client.stats());
        if let Err(e) = stats::write_report(&mut self.report, clients) {
            warn!(error = %e, "Failed to write stats report");
        }
    }

    fn shutdown(&mut self) {
        let clients = self.registry.client_count();
        self.registry.clear();
        info!(clients, "Server stopped, all sockets closed");
    }
}
