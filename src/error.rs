//! Error types for guestnet

use std::io;

use thiserror::Error;

/// Main error type for guestnet
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed dial target
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The host rejected a bridge call
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// A callback or reply broke the bridge contract
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Port {0} is already in use")]
    AddrInUse(u16),

    #[error("Port {0} has been closed")]
    ListenerClosed(u16),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Payload decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Result type alias for guestnet
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, "timeout"),
            Error::ConnectionClosed => io::Error::new(io::ErrorKind::NotConnected, "connection closed"),
            Error::ListenerClosed(_) => io::Error::new(io::ErrorKind::NotConnected, err.to_string()),
            Error::AddrInUse(_) => io::Error::new(io::ErrorKind::AddrInUse, err.to_string()),
            Error::InvalidAddress(_) => io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
            Error::Decode(_) | Error::Protocol(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err.to_string())
            }
            Error::Bridge(_) | Error::Config(_) => io::Error::new(io::ErrorKind::Other, err.to_string()),
        }
    }
}

/// Map the host's optional error string onto the error model.
///
/// The host signals success with no error at all; an error that is present
/// but empty is itself a contract violation.
pub fn check_host_reply(reply: std::result::Result<(), String>) -> Result<()> {
    reply.map_err(host_error)
}

/// Classify an error string reported by the host.
pub fn host_error(msg: String) -> Error {
    if msg.is_empty() {
        Error::Protocol("host returned an empty error message".into())
    } else {
        Error::Bridge(msg)
    }
}
