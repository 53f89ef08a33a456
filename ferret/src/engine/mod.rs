//! Embedded full-text index engine.
//!
//! The shard pool and the remote protocol treat this module as the
//! storage backend: documents, postings, metadata, spellings, queries
//! and the changeset WAL that replication replays.

pub mod change;
pub mod document;
pub mod index;
pub mod query;

pub use change::{Change, Changeset};
pub use document::{DocId, Document, Posting};
pub use index::Index;
pub use query::{Enquire, MSet, MSetItem, MatchStats, Query, Registry};

use std::path::PathBuf;

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Serialisation(#[from] crate::net::Error),

    #[error("index does not exist: {0:?}")]
    DoesNotExist(PathBuf),

    #[error("document {0} not found")]
    DocNotFound(DocId),

    #[error("index corrupt: {0}")]
    Corrupt(&'static str),

    #[error("index is read-only")]
    ReadOnly,

    #[error("uuid mismatch: expected {expected}, got {got}")]
    UuidMismatch { expected: String, got: String },

    #[error("revision mismatch: expected {expected}, got {got}")]
    RevisionMismatch { expected: u64, got: u64 },

    #[error("no changesets available from revision {0}")]
    NoChangesets(u64),

    #[error("weighting scheme \"{0}\" not registered")]
    UnknownWeighting(String),

    #[error("match spy \"{0}\" not registered")]
    UnknownSpy(String),
}

impl Error {
    /// A missing thing rather than a broken one.
    pub fn not_found(&self) -> bool {
        matches!(self, Error::DocNotFound(_) | Error::DoesNotExist(_))
    }
}
