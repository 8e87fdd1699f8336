//! Library error types.

use std::collections::TryReserveError;
use std::fmt;

/// A packval Result, normally returning a packval [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A packval error.
///
/// Every fallible mutator reserves the memory it needs before touching its
/// backing buffer, so an `Err` return always leaves the container exactly as
/// it was before the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The allocator declined to grow a backing buffer.
    Alloc(TryReserveError),
    /// The key is already present ([`Dict::insert`](crate::Dict::insert)).
    KeyExists,
    /// A byte buffer handed to a `from_bytes` loader does not parse as the
    /// advertised wire format.
    Encoding(&'static str),
    /// A table resize was requested while one is already running, or while
    /// resizing is disabled process-wide.
    ResizeForbidden,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Alloc(_) => write!(f, "Allocation failure while growing a container"),
            Error::KeyExists => write!(f, "Key already present"),
            Error::Encoding(msg) => write!(f, "Bad wire format: {}", msg),
            Error::ResizeForbidden => write!(f, "Table resize unavailable in current state"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Alloc(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(e: TryReserveError) -> Self {
        Error::Alloc(e)
    }
}
