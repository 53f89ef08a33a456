//! Shard handles.
//!
//! A shard wraps one opened index. Readable shards accept the read
//! surface only (the engine enforces it); a writable shard exists at
//! most once per endpoint, which the pool guarantees. Handles are
//! shared (`Arc`) but used by one caller at a time: the pool flips the
//! busy flag on checkout and clears it on checkin.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{self, DocId, Document, Index};

use super::endpoint::Endpoint;

/// Open mode for a shard checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub writable: bool,
    pub create_or_open: bool,
}

impl Flags {
    /// Open an existing shard read-only.
    pub const OPEN: Flags = Flags {
        writable: false,
        create_or_open: false,
    };
    /// Open read-only, creating the shard when missing.
    pub const CREATE_OR_OPEN: Flags = Flags {
        writable: false,
        create_or_open: true,
    };
    /// Open an existing shard for writing.
    pub const WRITABLE: Flags = Flags {
        writable: true,
        create_or_open: false,
    };
    /// Open for writing, creating the shard when missing.
    pub const WRITABLE_CREATE_OR_OPEN: Flags = Flags {
        writable: true,
        create_or_open: true,
    };
}

/// Aggregate stats for `UPDATE` replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStats {
    pub doccount: u64,
    pub lastdocid: DocId,
    pub doclength_lower_bound: u64,
    pub doclength_upper_bound: u64,
    pub has_positions: bool,
    pub total_length: u64,
    pub uuid: String,
}

/// One opened index shard.
pub struct Shard {
    endpoint: Endpoint,
    flags: Flags,
    index: Mutex<Index>,
    busy: AtomicBool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("endpoint", &self.endpoint.to_string())
            .field("writable", &self.flags.writable)
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .finish()
    }
}

impl Shard {
    /// Open the shard behind an endpoint. `root` anchors relative
    /// endpoint paths on disk; `memory://` endpoints live on the heap
    /// for as long as the pool caches the handle.
    pub fn open(endpoint: &Endpoint, flags: Flags, root: &Path) -> Result<Self, engine::Error> {
        let index = if endpoint.scheme == "memory" {
            Index::memory()
        } else {
            Index::open(&root.join(&endpoint.path), flags.writable, flags.create_or_open)?
        };

        debug!(
            "opened {} shard {}",
            if flags.writable { "writable" } else { "readable" },
            endpoint,
        );

        Ok(Self {
            endpoint: endpoint.clone(),
            flags,
            index: Mutex::new(index),
            busy: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_writable(&self) -> bool {
        self.flags.writable
    }

    /// Claim the handle for one caller. The pool calls this on
    /// checkout; a false return means the handle is already out.
    pub(crate) fn try_acquire(&self) -> bool {
        !self.busy.swap(true, Ordering::AcqRel)
    }

    /// Release the handle. The pool calls this on checkin.
    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run a closure against the index. Protocol handlers use this for
    /// iteration-shaped reads that have no single-call equivalent.
    pub fn with_index<R>(&self, f: impl FnOnce(&Index) -> R) -> R {
        f(&self.index.lock())
    }

    pub fn with_index_mut<R>(&self, f: impl FnOnce(&mut Index) -> R) -> R {
        f(&mut self.index.lock())
    }

    /// Re-check the on-disk revision; true iff it advanced.
    pub fn reopen(&self) -> Result<bool, engine::Error> {
        self.index.lock().reopen()
    }

    pub fn revision(&self) -> u64 {
        self.index.lock().revision()
    }

    pub fn uuid(&self) -> String {
        self.index.lock().uuid().to_owned()
    }

    pub fn update_stats(&self) -> UpdateStats {
        let index = self.index.lock();
        UpdateStats {
            doccount: index.doccount(),
            lastdocid: index.lastdocid(),
            doclength_lower_bound: index.doclength_lower_bound(),
            doclength_upper_bound: index.doclength_upper_bound(),
            has_positions: index.has_positions(),
            total_length: index.total_length(),
            uuid: index.uuid().to_owned(),
        }
    }

    pub fn get_document(&self, docid: DocId) -> Result<Document, engine::Error> {
        self.index.lock().document(docid).cloned()
    }

    pub fn add_document(&self, document: Document) -> Result<DocId, engine::Error> {
        self.index.lock().add_document(document)
    }

    pub fn replace_document(&self, docid: DocId, document: Document) -> Result<(), engine::Error> {
        self.index.lock().replace_document(docid, document)
    }

    pub fn replace_document_term(
        &self,
        term: &str,
        document: Document,
    ) -> Result<DocId, engine::Error> {
        self.index.lock().replace_document_term(term, document)
    }

    pub fn delete_document(&self, docid: DocId) -> Result<(), engine::Error> {
        self.index.lock().delete_document(docid)
    }

    pub fn delete_document_term(&self, term: &str) -> Result<(), engine::Error> {
        self.index.lock().delete_document_term(term)
    }

    pub fn commit(&self) -> Result<u64, engine::Error> {
        self.index.lock().commit()
    }

    pub fn cancel(&self) -> Result<(), engine::Error> {
        let mut index = self.index.lock();
        index.begin_transaction()?;
        index.cancel();
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<(), engine::Error> {
        self.index.lock().begin_transaction()
    }

    pub fn get_metadata(&self, key: &str) -> Vec<u8> {
        self.index.lock().metadata(key)
    }

    pub fn set_metadata(&self, key: &str, value: &[u8]) -> Result<(), engine::Error> {
        self.index.lock().set_metadata(key, value)
    }

    pub fn add_spelling(&self, term: &str, freq: u64) -> Result<(), engine::Error> {
        self.index.lock().add_spelling(term, freq)
    }

    pub fn remove_spelling(&self, term: &str, freq: u64) -> Result<u64, engine::Error> {
        self.index.lock().remove_spelling(term, freq)
    }

    /// Local shards have nothing to ping; the pool still refreshes the
    /// endpoint's recency when this is called.
    pub fn keep_alive(&self) {
        self.index.lock().keep_alive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint(uri: &str) -> Endpoint {
        Endpoint::parse(uri).unwrap()
    }

    #[test]
    fn test_memory_shard() {
        let shard = Shard::open(
            &endpoint("memory:///unit"),
            Flags::WRITABLE_CREATE_OR_OPEN,
            Path::new("/nonexistent"),
        )
        .unwrap();

        let mut doc = Document::new(&b"data"[..]);
        doc.add_term("data", 1);
        let docid = shard.add_document(doc).unwrap();
        assert_eq!(shard.get_document(docid).unwrap().data, b"data");
        assert!(!shard.reopen().unwrap());
    }

    #[test]
    fn test_readable_rejects_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let writable = Shard::open(
            &endpoint("file:///idx"),
            Flags::WRITABLE_CREATE_OR_OPEN,
            dir.path(),
        )
        .unwrap();
        writable.commit().unwrap();

        let readable = Shard::open(&endpoint("file:///idx"), Flags::OPEN, dir.path()).unwrap();
        assert!(readable.add_document(Document::default()).is_err());
        assert!(readable.get_metadata("anything").is_empty());
    }

    #[test]
    fn test_busy_flag() {
        let shard = Shard::open(
            &endpoint("memory:///busy"),
            Flags::WRITABLE_CREATE_OR_OPEN,
            Path::new("/nonexistent"),
        )
        .unwrap();

        assert!(shard.try_acquire());
        assert!(!shard.try_acquire());
        shard.release();
        assert!(shard.try_acquire());
    }

    #[test]
    fn test_update_stats() {
        let shard = Shard::open(
            &endpoint("memory:///stats"),
            Flags::WRITABLE_CREATE_OR_OPEN,
            Path::new("/nonexistent"),
        )
        .unwrap();

        let mut doc = Document::new(&b"one two"[..]);
        doc.add_position("one", 1).add_position("two", 2);
        shard.add_document(doc).unwrap();

        let stats = shard.update_stats();
        assert_eq!(stats.doccount, 1);
        assert_eq!(stats.lastdocid, 1);
        assert_eq!(stats.total_length, 2);
        assert!(stats.has_positions);
        assert!(!stats.uuid.is_empty());
    }
}
