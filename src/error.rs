//! Error taxonomy for the server.
//!
//! Only [`BindError`] is fatal to the whole server. Everything else is
//! scoped to a single session or a single call:
//! - [`TransportError`] ends the affected session
//! - [`ProtocolError`] and [`HandlerError`] are answered in-band and the
//!   session keeps reading

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure to bind the listening endpoint. The server does not start.
#[derive(Error, Debug)]
pub enum BindError {
    /// Another socket already owns the address.
    #[error("address {0} is already in use")]
    AddrInUse(String),

    /// The process may not bind this address (usually a privileged port).
    #[error("permission denied binding {0}")]
    PermissionDenied(String),

    /// Port outside 1-65535.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Address text could not be resolved to a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Any other socket setup failure.
    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    /// Classify an I/O error raised while binding `addr`.
    pub fn from_io(addr: impl Into<String>, err: io::Error) -> Self {
        let addr = addr.into();
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddrInUse(addr),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(addr),
            io::ErrorKind::AddrNotAvailable => BindError::InvalidAddress(addr),
            _ => BindError::Io { addr, source: err },
        }
    }
}

/// Session-level transport failure. Terminal for that session only.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent more than the line limit without a newline.
    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// No input arrived within the idle timeout.
    #[error("idle for {0:?}")]
    IdleTimeout(Duration),
}

/// Malformed request. Answered with an error response; the session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

/// Per-call RPC failure, surfaced to the client inside the response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

/// Errors that stop [`crate::server::Server`] before or while running.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] BindError),
}
