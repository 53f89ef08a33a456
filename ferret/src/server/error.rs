//! Protocol errors and their wire form.
//!
//! Domain errors become `Exception` replies and the connection keeps
//! serving; network and serialisation errors tear the connection down.
//! The exception payload is
//! `type-code:u8 | ctx-len | ctx | msg-len | msg | error-string`.

use thiserror::Error;

use crate::net::length::{serialise_string, unserialise_string};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Net(#[from] crate::net::Error),

    #[error("{0}")]
    Pool(#[from] crate::backend::pool::Error),

    #[error("{0}")]
    Engine(#[from] crate::engine::Error),

    #[error("{0}")]
    Endpoint(#[from] crate::backend::endpoint::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("replication failed: {0}")]
    ReplicationFailed(String),

    #[error("peer reported: {0}")]
    Remote(String),
}

/// One-byte error taxonomy used in exception payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Generic = 0,
    InvalidArgument = 1,
    Database = 2,
    NotFound = 3,
    Timeout = 4,
    PoolClosed = 5,
    ResourceExhausted = 6,
    NetworkTimeout = 7,
}

impl Error {
    /// The connection cannot continue after this error.
    pub fn fatal(&self) -> bool {
        match self {
            Error::Net(err) => err.fatal(),
            _ => false,
        }
    }

    /// Best-effort exception then detach, instead of plain detach.
    pub fn network_timeout(&self) -> bool {
        matches!(self, Error::Net(crate::net::Error::Timeout))
    }

    pub fn type_code(&self) -> TypeCode {
        use crate::backend::pool::Error as PoolError;
        use crate::engine::Error as EngineError;

        match self {
            Error::InvalidArgument(_) | Error::Endpoint(_) => TypeCode::InvalidArgument,
            Error::Pool(PoolError::Timeout) => TypeCode::Timeout,
            Error::Pool(PoolError::PoolClosed) => TypeCode::PoolClosed,
            Error::Pool(PoolError::ResourceExhausted) => TypeCode::ResourceExhausted,
            Error::Pool(PoolError::Locked) => TypeCode::Database,
            Error::Pool(PoolError::Shard(err)) | Error::Engine(err) => {
                if err.not_found() {
                    TypeCode::NotFound
                } else if matches!(
                    err,
                    EngineError::UnknownWeighting(_) | EngineError::UnknownSpy(_)
                ) {
                    TypeCode::InvalidArgument
                } else {
                    TypeCode::Database
                }
            }
            Error::Net(crate::net::Error::Timeout) => TypeCode::NetworkTimeout,
            Error::Net(crate::net::Error::UnknownMessage(_)) => TypeCode::InvalidArgument,
            _ => TypeCode::Generic,
        }
    }

    /// Exception reply payload.
    pub fn serialise(&self, context: &str) -> Vec<u8> {
        let message = self.to_string();
        let mut buf = vec![self.type_code() as u8];
        serialise_string(&mut buf, context.as_bytes());
        serialise_string(&mut buf, message.as_bytes());
        // The error string runs to the end of the payload.
        buf.extend_from_slice(message.as_bytes());
        buf
    }

    /// Decode an exception payload into (type code, context, message).
    pub fn unserialise(payload: &[u8]) -> Result<(u8, String, String), crate::net::Error> {
        let p = &mut &payload[..];
        let (&code, rest) = p
            .split_first()
            .ok_or(crate::net::Error::Serialisation("empty exception payload"))?;
        *p = rest;
        let context = String::from_utf8_lossy(unserialise_string(p)?).into_owned();
        let message = String::from_utf8_lossy(unserialise_string(p)?).into_owned();
        Ok((code, context, message))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exception_round_trip() {
        let err = Error::InvalidArgument("weighting scheme \"pagerank\" not registered".into());
        let payload = err.serialise("msg_query");

        let (code, context, message) = Error::unserialise(&payload).unwrap();
        assert_eq!(code, TypeCode::InvalidArgument as u8);
        assert_eq!(context, "msg_query");
        assert!(message.contains("pagerank"));
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(
            Error::Pool(crate::backend::pool::Error::Timeout).type_code(),
            TypeCode::Timeout
        );
        assert_eq!(
            Error::Engine(crate::engine::Error::DocNotFound(4)).type_code(),
            TypeCode::NotFound
        );
        assert_eq!(
            Error::Engine(crate::engine::Error::UnknownWeighting("x".into())).type_code(),
            TypeCode::InvalidArgument
        );
    }

    #[test]
    fn test_fatal() {
        assert!(Error::Net(crate::net::Error::Eof).fatal());
        assert!(!Error::InvalidArgument("nope".into()).fatal());
        assert!(!Error::Net(crate::net::Error::Timeout).fatal());
        assert!(Error::Net(crate::net::Error::Timeout).network_timeout());
    }
}
