//! chargen: a character generator daemon
//!
//! Serves the classic chargen pattern (RFC 864 style):
//! - TCP: an endless stream of 72-character rotating lines
//! - UDP: one random-length slice of the pattern per request datagram
//!
//! Features:
//! - Single-threaded poll(2) event loop over every socket
//! - Per-connection rx/tx counters, dumped on SIGUSR1
//! - Graceful shutdown on SIGINT/SIGTERM

mod config;
mod error;
mod pattern;
mod runtime;
mod signals;
mod stats;

use config::Config;
use error::Fatal;
use runtime::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = Config::load();

    // Initialize logging; stdout is left to the stats report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        bind = %config.bind,
        port = config.port,
        tcp = config.tcp,
        udp = config.udp,
        max_datagram = config.max_datagram,
        "Starting chargen"
    );

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(
                op = e.op(),
                location = %e.location(),
                error = %e.io_error(),
                "Fatal error"
            );
            signals::terminate_process_group();
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<(), Fatal> {
    signals::install()?;

    let mut server = Server::bind(config)?;
    server.run(&signals::FLAGS)
}
