use crate::codec::FramingError;
use derive_more::Display;
use std::{io, sync::Arc, time::Duration};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Every failure a call or a client can observe.
///
/// `Clone` because a single transport failure is handed to every call that
/// was pending on the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("could not connect to {address} after {attempts} attempts: {reason}")]
    ConnectTimeout {
        address: String,
        attempts: u32,
        reason: String,
    },

    #[error("unresolved address: {0}")]
    UnresolvedAddress(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("{0}")]
    Application(String),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::UnresolvedAddress(_) => ErrorKind::UnresolvedAddress,
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::MalformedRequest(_) => ErrorKind::MalformedRequest,
            Self::Application(_) => ErrorKind::Application,
            Self::Framing(_) => ErrorKind::Framing,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost(reason.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    #[display("connect timeout")]
    ConnectTimeout,
    #[display("unresolved address")]
    UnresolvedAddress,
    #[display("connection lost")]
    ConnectionLost,
    #[display("timeout")]
    Timeout,
    #[display("method not found")]
    MethodNotFound,
    #[display("malformed request")]
    MalformedRequest,
    #[display("application error")]
    Application,
    #[display("framing error")]
    Framing,
    #[display("codec error")]
    Codec,
    #[display("io error")]
    Io,
}
