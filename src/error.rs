//! Error types for remmap.

use std::io;

/// Errors surfaced by the mapping client, the daemon, and the RPC layer.
///
/// Protocol-level negative responses (`Unavailable`, `WrongSize`, ...) are
/// not errors: the RPC operations return them as ordinary
/// [`ResponseCode`](crate::rpc::ResponseCode) values. Only transport and
/// local-state failures land here.
#[derive(Debug)]
pub enum Error {
    /// IO error from the socket, the backing file, or a syscall.
    Io(io::Error),
    /// The filename is already mapped in this process.
    AlreadyMapped(String),
    /// Unmap of a filename that was never mapped.
    NotMapped(String),
    /// Filename or object id does not fit the fixed wire field.
    NameTooLong(usize),
    /// Peer sent a message that does not decode.
    Protocol(&'static str),
    /// No server address registered under this id.
    NoSuchServer(u32),
    /// Operation on a transport that has already been finalized.
    TransportClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::AlreadyMapped(name) => write!(f, "{} is already mapped", name),
            Error::NotMapped(name) => write!(f, "{} is not mapped", name),
            Error::NameTooLong(len) => write!(f, "name of {} bytes exceeds the wire field", len),
            Error::Protocol(what) => write!(f, "protocol violation: {}", what),
            Error::NoSuchServer(id) => write!(f, "no server registered under id {}", id),
            Error::TransportClosed => write!(f, "transport has been finalized"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(io::Error::from_raw_os_error(e as i32))
    }
}
