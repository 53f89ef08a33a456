//! Network errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation: {0}")]
    Serialisation(&'static str),

    #[error("network timeout")]
    Timeout,

    #[error("connection closed by peer")]
    Eof,

    #[error("unknown message type: {0}")]
    UnknownMessage(u8),

    #[error("file frame too large")]
    FileTooLarge,
}

impl Error {
    /// The connection is beyond saving and should be detached
    /// without attempting a reply.
    pub fn fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Serialisation(_) | Error::Eof)
    }
}
