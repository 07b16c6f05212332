use thiserror::Error;

use crate::msg::RemoteErrorKind;
use crate::transport::ErrorCode;

pub type Result<T> = core::result::Result<T, Error>;

/// Enumeration of errors that may occur during network operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A socket operation failed.
    #[error("{op} failed: {message} ({code:?})")]
    Transport {
        op: &'static str,
        code: ErrorCode,
        message: String,
    },
    /// Peer unreachable, or gone before the exchange completed.
    #[error("connection error: {0}")]
    Connection(String),
    /// Malformed or truncated message.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Error reported by the other side of the connection.
    #[error("remote {kind:?} error: {message}")]
    Remote {
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("invalid run mode: {0}")]
    InvalidMode(String),
    #[error("invalid endpoint address: {0}")]
    InvalidEndpoint(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("{0}")]
    CoreError(#[from] simbatch_core::Error),

    #[error("other: {0}")]
    Other(String),
}

impl Error {
    /// Whether the error means the connection itself broke down, as
    /// opposed to the peer sending something unreadable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Connection(_))
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::BincodeError(_))
    }
}
