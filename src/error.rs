//! Unrecoverable server errors.
//!
//! Transient conditions (interrupted calls, would-block, peers going away)
//! never reach this type; they are handled where they happen. Everything
//! else ends the process, so the error records which operation failed and
//! where it was called from.

use std::fmt;
use std::io;
use std::panic::Location;

/// A failure the server cannot recover from.
#[derive(Debug)]
pub struct Fatal {
    op: &'static str,
    location: &'static Location<'static>,
    source: io::Error,
}

impl Fatal {
    /// Wrap `source` as the failure of `op`, recording the caller's location.
    #[track_caller]
    pub fn new(op: &'static str, source: io::Error) -> Self {
        Self {
            op,
            location: Location::caller(),
            source,
        }
    }

    /// Name of the failed operation (e.g. "bind", "accept").
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Source location of the failed call.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Underlying OS error.
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}: {}",
            self.location.file(),
            self.location.line(),
            self.op,
            self.source
        )
    }
}

impl std::error::Error for Fatal {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Conversion of plain I/O results into [`Fatal`] ones.
pub trait OrFatal<T> {
    fn or_fatal(self, op: &'static str) -> Result<T, Fatal>;
}

impl<T> OrFatal<T> for io::Result<T> {
    #[track_caller]
    fn or_fatal(self, op: &'static str) -> Result<T, Fatal> {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(Fatal::new(op, e)),
        }
    }
}
