//! Configuration module for the chargen daemon.
//!
//! Everything comes from the command line; no configuration file or
//! environment variable is consulted.

use crate::pattern::PATTERN_LEN;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 1919;

/// Default upper bound for UDP reply lengths.
pub const DEFAULT_MAX_DATAGRAM: usize = 512;

/// Command-line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "chargen")]
#[command(version = "0.1.0")]
#[command(about = "Character generator serving a repeating ASCII pattern over TCP and UDP", long_about = None)]
pub struct CliArgs {
    /// Enable the TCP service (default: both when neither -t nor -u is given)
    #[arg(short, long)]
    pub tcp: bool,

    /// Enable the UDP service (default: both when neither -t nor -u is given)
    #[arg(short, long)]
    pub udp: bool,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Largest UDP reply in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM)]
    pub max_datagram: usize,

    /// Listen backlog for the TCP socket
    #[arg(long, default_value_t = 5)]
    pub backlog: i32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Transport served by a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub tcp: bool,
    pub udp: bool,
    pub bind: IpAddr,
    pub port: u16,
    pub max_datagram: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments.
    ///
    /// Help and version requests exit with status 0, malformed arguments
    /// print usage and exit through clap.
    pub fn load() -> Self {
        match Self::try_from_args(std::env::args_os()) {
            Ok(config) => config,
            Err(ConfigError::Cli(e)) => e.exit(),
            Err(e) => CliArgs::command()
                .error(clap::error::ErrorKind::ValueValidation, e)
                .exit(),
        }
    }

    /// Parse and validate an argument list (first item is the program name).
    pub fn try_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args).map_err(ConfigError::Cli)?;
        Self::from_cli(cli)
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        if cli.max_datagram > PATTERN_LEN {
            return Err(ConfigError::DatagramTooLarge(cli.max_datagram));
        }
        if cli.backlog <= 0 {
            return Err(ConfigError::InvalidBacklog(cli.backlog));
        }

        // Neither flag means both services.
        let (tcp, udp) = if cli.tcp || cli.udp {
            (cli.tcp, cli.udp)
        } else {
            (true, true)
        };

        Ok(Config {
            tcp,
            udp,
            bind: cli.bind,
            port: cli.port,
            max_datagram: cli.max_datagram,
            backlog: cli.backlog,
            log_level: cli.log_level,
        })
    }

    /// Protocols to serve, TCP first.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = Vec::with_capacity(2);
        if self.tcp {
            protocols.push(Protocol::Tcp);
        }
        if self.udp {
            protocols.push(Protocol::Udp);
        }
        protocols
    }

    /// Address every listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    Cli(clap::Error),
    DatagramTooLarge(usize),
    InvalidBacklog(i32),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Cli(e) => write!(f, "{e}"),
            ConfigError::DatagramTooLarge(n) => {
                write!(
                    f,
                    "max datagram size {n} exceeds the pattern length {PATTERN_LEN}"
                )
            }
            ConfigError::InvalidBacklog(n) => write!(f, "listen backlog must be positive, got {n}"),
        }
    }
}

impl std::error::Error for ConfigError {}
