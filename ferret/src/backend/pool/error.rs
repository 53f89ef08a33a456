//! Pool errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("checkout timeout")]
    Timeout,

    #[error("pool is shut down")]
    PoolClosed,

    #[error("endpoint is locked for replication")]
    Locked,

    #[error("too many shards open")]
    ResourceExhausted,

    #[error("{0}")]
    Shard(#[from] crate::engine::Error),
}

impl Error {
    /// The caller may retry later.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::ResourceExhausted)
    }
}
