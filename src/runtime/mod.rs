//! Single-threaded readiness runtime.
//!
//! One `poll(2)` wait over every live socket, dispatching readiness to:
//! - `Listener`: TCP accept or one UDP request/response
//! - `Client`: bounded read and write on a connected TCP stream
//!
//! The `Registry` owns every descriptor; entries are tagged `Slot`s so
//! dispatch never depends on an entry's position.

mod connection;
mod datagram;
mod event_loop;
mod listener;
mod registry;

pub use connection::ClientStats;
pub use event_loop::Server;
