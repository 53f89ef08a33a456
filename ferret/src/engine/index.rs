//! The embedded index.
//!
//! One index per shard directory: a baseline image plus a WAL of
//! changesets, one per commit. Writers journal changes between
//! commits; `cancel` drops the journal, `commit` bumps the revision,
//! appends the changeset and rewrites the baseline. Replicas replay
//! changesets through [`Index::apply_changeset`].

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use tracing::debug;
use uuid::Uuid;

use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};

use super::change::{Change, Changeset};
use super::document::{DocId, Document};
use super::Error;

/// Baseline image file inside a shard directory.
pub const BASELINE_FILE: &str = "baseline.db";
/// Changeset directory inside a shard directory.
pub const WAL_DIR: &str = "wal";

const BASELINE_MAGIC: &[u8] = b"ferret-index\x01";

/// Committed index state. Postings are rebuilt from the document
/// store on load, so only documents, metadata and spellings persist.
#[derive(Debug, Clone, Default)]
struct Data {
    docs: FnvHashMap<DocId, Document>,
    /// term -> postings, ascending by docid.
    terms: BTreeMap<String, Vec<(DocId, u64)>>,
    metadata: BTreeMap<String, Vec<u8>>,
    spellings: BTreeMap<String, u64>,
    next_docid: DocId,
    total_length: u64,
}

impl Data {
    fn new() -> Self {
        Self {
            next_docid: 1,
            ..Default::default()
        }
    }

    fn index_document(&mut self, docid: DocId, document: Document) {
        self.total_length += document.length();
        for posting in &document.terms {
            let postings = self.terms.entry(posting.term.clone()).or_default();
            match postings.binary_search_by_key(&docid, |&(id, _)| id) {
                Ok(found) => postings[found].1 = posting.wdf,
                Err(insert) => postings.insert(insert, (docid, posting.wdf)),
            }
        }
        self.docs.insert(docid, document);
        if docid >= self.next_docid {
            self.next_docid = docid + 1;
        }
    }

    fn unindex_document(&mut self, docid: DocId) -> Option<Document> {
        let document = self.docs.remove(&docid)?;
        self.total_length -= document.length();
        for posting in &document.terms {
            if let Some(postings) = self.terms.get_mut(&posting.term) {
                postings.retain(|&(id, _)| id != docid);
                if postings.is_empty() {
                    self.terms.remove(&posting.term);
                }
            }
        }
        Some(document)
    }

    fn apply(&mut self, change: &Change) {
        match change {
            Change::AddDocument { docid, document }
            | Change::ReplaceDocument { docid, document } => {
                self.unindex_document(*docid);
                self.index_document(*docid, document.clone());
            }
            Change::DeleteDocument { docid } => {
                self.unindex_document(*docid);
            }
            Change::SetMetadata { key, value } => {
                if value.is_empty() {
                    self.metadata.remove(key);
                } else {
                    self.metadata.insert(key.clone(), value.clone());
                }
            }
            Change::AddSpelling { term, freq } => {
                *self.spellings.entry(term.clone()).or_default() += freq;
            }
            Change::RemoveSpelling { term, freq } => {
                if let Some(current) = self.spellings.get_mut(term) {
                    if *current <= *freq {
                        self.spellings.remove(term);
                    } else {
                        *current -= freq;
                    }
                }
            }
        }
    }
}

/// One opened index.
#[derive(Debug)]
pub struct Index {
    path: Option<PathBuf>,
    writable: bool,
    uuid: String,
    revision: u64,
    data: Data,
    /// State at the last commit; `cancel` rolls back to this.
    committed: Data,
    pending: Vec<Change>,
}

impl Index {
    /// Fresh writable in-memory index.
    pub fn memory() -> Self {
        Self {
            path: None,
            writable: true,
            uuid: Uuid::new_v4().to_string(),
            revision: 0,
            data: Data::new(),
            committed: Data::new(),
            pending: vec![],
        }
    }

    /// Open an on-disk index.
    pub fn open(path: &Path, writable: bool, create: bool) -> Result<Self, Error> {
        let baseline = path.join(BASELINE_FILE);

        if !baseline.exists() {
            if !create {
                return Err(Error::DoesNotExist(path.to_path_buf()));
            }

            fs::create_dir_all(path.join(WAL_DIR))?;
            let index = Self {
                path: Some(path.to_path_buf()),
                writable,
                uuid: Uuid::new_v4().to_string(),
                revision: 0,
                data: Data::new(),
                committed: Data::new(),
                pending: vec![],
            };
            index.persist_baseline()?;
            debug!("created index at {:?}", path);
            return Ok(index);
        }

        let (uuid, revision, data) = load_baseline(&baseline)?;
        let mut index = Self {
            path: Some(path.to_path_buf()),
            writable,
            uuid,
            revision,
            data: data.clone(),
            committed: data,
            pending: vec![],
        };
        index.replay_wal()?;
        Ok(index)
    }

    /// Re-check the on-disk state. Returns true iff the revision
    /// advanced and the handle now sees the newer state.
    pub fn reopen(&mut self) -> Result<bool, Error> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(false),
        };

        let disk_revision = baseline_revision(&path.join(BASELINE_FILE))?;
        let newest = newest_wal_revision(&path)?.unwrap_or(disk_revision);
        if newest.max(disk_revision) <= self.revision {
            return Ok(false);
        }

        let reopened = Self::open(&path, self.writable, false)?;
        self.uuid = reopened.uuid;
        self.revision = reopened.revision;
        self.data = reopened.data;
        self.committed = reopened.committed;
        self.pending.clear();
        Ok(true)
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn doccount(&self) -> u64 {
        self.data.docs.len() as u64
    }

    pub fn lastdocid(&self) -> DocId {
        self.data.next_docid - 1
    }

    pub fn total_length(&self) -> u64 {
        self.data.total_length
    }

    pub fn has_positions(&self) -> bool {
        self.data
            .docs
            .values()
            .any(|doc| doc.terms.iter().any(|posting| !posting.positions.is_empty()))
    }

    pub fn doclength_lower_bound(&self) -> u64 {
        self.data
            .docs
            .values()
            .map(Document::length)
            .min()
            .unwrap_or(0)
    }

    pub fn doclength_upper_bound(&self) -> u64 {
        self.data
            .docs
            .values()
            .map(Document::length)
            .max()
            .unwrap_or(0)
    }

    pub fn avg_length(&self) -> f64 {
        if self.data.docs.is_empty() {
            0.0
        } else {
            self.data.total_length as f64 / self.data.docs.len() as f64
        }
    }

    // Reads.

    pub fn document(&self, docid: DocId) -> Result<&Document, Error> {
        self.data.docs.get(&docid).ok_or(Error::DocNotFound(docid))
    }

    pub fn term_exists(&self, term: &str) -> bool {
        self.data.terms.contains_key(term)
    }

    pub fn termfreq(&self, term: &str) -> u64 {
        self.data
            .terms
            .get(term)
            .map(|postings| postings.len() as u64)
            .unwrap_or(0)
    }

    pub fn collfreq(&self, term: &str) -> u64 {
        self.data
            .terms
            .get(term)
            .map(|postings| postings.iter().map(|&(_, wdf)| wdf).sum())
            .unwrap_or(0)
    }

    pub fn doclength(&self, docid: DocId) -> Result<u64, Error> {
        Ok(self.document(docid)?.length())
    }

    pub fn unique_terms(&self, docid: DocId) -> Result<u64, Error> {
        Ok(self.document(docid)?.unique_terms())
    }

    /// Terms with the prefix, ascending, with their term frequencies.
    pub fn all_terms(&self, prefix: &str) -> Vec<(String, u64)> {
        self.terms_range(prefix)
            .map(|(term, postings)| (term.clone(), postings.len() as u64))
            .collect()
    }

    /// A document's terms, ascending: (term, wdf, termfreq).
    pub fn termlist(&self, docid: DocId) -> Result<Vec<(String, u64, u64)>, Error> {
        let document = self.document(docid)?;
        Ok(document
            .terms
            .iter()
            .map(|posting| (posting.term.clone(), posting.wdf, self.termfreq(&posting.term)))
            .collect())
    }

    /// A term's postings, ascending by docid: (docid, wdf).
    pub fn postlist(&self, term: &str) -> Vec<(DocId, u64)> {
        self.data.terms.get(term).cloned().unwrap_or_default()
    }

    pub fn positionlist(&self, docid: DocId, term: &str) -> Result<Vec<u64>, Error> {
        Ok(self
            .document(docid)?
            .posting(term)
            .map(|posting| posting.positions.clone())
            .unwrap_or_default())
    }

    pub fn positionlist_count(&self, docid: DocId, term: &str) -> Result<u64, Error> {
        Ok(self.positionlist(docid, term)?.len() as u64)
    }

    pub fn value_freq(&self, slot: u64) -> u64 {
        self.data
            .docs
            .values()
            .filter(|doc| doc.values.contains_key(&slot))
            .count() as u64
    }

    pub fn value_lower_bound(&self, slot: u64) -> Vec<u8> {
        self.data
            .docs
            .values()
            .filter_map(|doc| doc.values.get(&slot))
            .min()
            .cloned()
            .unwrap_or_default()
    }

    pub fn value_upper_bound(&self, slot: u64) -> Vec<u8> {
        self.data
            .docs
            .values()
            .filter_map(|doc| doc.values.get(&slot))
            .max()
            .cloned()
            .unwrap_or_default()
    }

    /// Metadata value; missing keys read as empty, like a removed key.
    pub fn metadata(&self, key: &str) -> Vec<u8> {
        self.data.metadata.get(key).cloned().unwrap_or_default()
    }

    /// Metadata keys with the prefix, ascending.
    pub fn metadata_keys(&self, prefix: &str) -> Vec<String> {
        self.data
            .metadata
            .range::<String, _>((Bound::Included(prefix.to_owned()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn spelling_freq(&self, term: &str) -> u64 {
        self.data.spellings.get(term).copied().unwrap_or(0)
    }

    /// No-op on a local index; remote handles ping their peer instead.
    pub fn keep_alive(&self) {}

    // Writes. All journal into the pending changeset.

    pub fn add_document(&mut self, document: Document) -> Result<DocId, Error> {
        self.check_writable()?;
        let docid = self.data.next_docid;
        self.record(Change::AddDocument { docid, document });
        Ok(docid)
    }

    pub fn replace_document(&mut self, docid: DocId, document: Document) -> Result<(), Error> {
        self.check_writable()?;
        self.record(Change::ReplaceDocument { docid, document });
        Ok(())
    }

    /// Replace the document posting a unique term, or add a new one
    /// when no document posts it.
    pub fn replace_document_term(
        &mut self,
        term: &str,
        document: Document,
    ) -> Result<DocId, Error> {
        self.check_writable()?;
        match self.postlist(term).first() {
            Some(&(docid, _)) => {
                self.record(Change::ReplaceDocument { docid, document });
                Ok(docid)
            }
            None => self.add_document(document),
        }
    }

    pub fn delete_document(&mut self, docid: DocId) -> Result<(), Error> {
        self.check_writable()?;
        if !self.data.docs.contains_key(&docid) {
            return Err(Error::DocNotFound(docid));
        }
        self.record(Change::DeleteDocument { docid });
        Ok(())
    }

    /// Delete every document posting the term. Deleting with an
    /// unknown term is not an error.
    pub fn delete_document_term(&mut self, term: &str) -> Result<(), Error> {
        self.check_writable()?;
        for (docid, _) in self.postlist(term) {
            self.record(Change::DeleteDocument { docid });
        }
        Ok(())
    }

    pub fn set_metadata(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.check_writable()?;
        self.record(Change::SetMetadata {
            key: key.to_owned(),
            value: value.to_vec(),
        });
        Ok(())
    }

    pub fn add_spelling(&mut self, term: &str, freq: u64) -> Result<(), Error> {
        self.check_writable()?;
        self.record(Change::AddSpelling {
            term: term.to_owned(),
            freq,
        });
        Ok(())
    }

    /// Returns how much frequency was actually removed.
    pub fn remove_spelling(&mut self, term: &str, freq: u64) -> Result<u64, Error> {
        self.check_writable()?;
        let removed = freq.min(self.spelling_freq(term));
        if removed > 0 {
            self.record(Change::RemoveSpelling {
                term: term.to_owned(),
                freq,
            });
        }
        Ok(removed)
    }

    /// The pending journal is the transaction; this only asserts
    /// writability, for API parity with explicit-transaction callers.
    pub fn begin_transaction(&mut self) -> Result<(), Error> {
        self.check_writable()
    }

    /// Discard uncommitted changes.
    pub fn cancel(&mut self) {
        if !self.pending.is_empty() {
            debug!("cancelling {} uncommitted changes", self.pending.len());
            self.pending.clear();
            self.data = self.committed.clone();
        }
    }

    /// Commit pending changes: advance the revision, append the
    /// changeset, rewrite the baseline. Committing nothing is a no-op.
    pub fn commit(&mut self) -> Result<u64, Error> {
        self.check_writable()?;
        if self.pending.is_empty() {
            return Ok(self.revision);
        }

        let changeset = Changeset {
            uuid: self.uuid.clone(),
            from_revision: self.revision,
            to_revision: self.revision + 1,
            changes: std::mem::take(&mut self.pending),
        };

        self.revision += 1;
        self.committed = self.data.clone();
        self.persist_changeset(&changeset)?;
        self.persist_baseline()?;
        debug!("committed revision {}", self.revision);

        Ok(self.revision)
    }

    // Replication surface.

    /// Paths of the stored changesets spanning `(from_revision, ..]`,
    /// in replay order. Fails when the span has a gap.
    pub fn changesets_from(&self, from_revision: u64) -> Result<Vec<PathBuf>, Error> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Err(Error::NoChangesets(from_revision)),
        };

        let mut files = vec![];
        for revision in from_revision + 1..=self.revision {
            let file = path.join(WAL_DIR).join(format!("changes.{}", revision));
            if !file.exists() {
                return Err(Error::NoChangesets(from_revision));
            }
            files.push(file);
        }
        Ok(files)
    }

    /// Files making up a full copy of this index.
    pub fn snapshot_files(&self) -> Vec<PathBuf> {
        match &self.path {
            Some(path) => vec![path.join(BASELINE_FILE)],
            None => vec![],
        }
    }

    /// Replay one changeset produced by a peer at the same uuid and
    /// revision. Used on replicas; the handle must be writable and
    /// must not have uncommitted changes.
    pub fn apply_changeset(&mut self, bytes: &[u8]) -> Result<u64, Error> {
        self.check_writable()?;
        if !self.pending.is_empty() {
            return Err(Error::Corrupt("changeset replay with uncommitted changes"));
        }

        let changeset = Changeset::unserialise(bytes)?;
        if changeset.uuid != self.uuid {
            return Err(Error::UuidMismatch {
                expected: self.uuid.clone(),
                got: changeset.uuid,
            });
        }
        if changeset.from_revision != self.revision {
            return Err(Error::RevisionMismatch {
                expected: self.revision,
                got: changeset.from_revision,
            });
        }

        for change in &changeset.changes {
            self.data.apply(change);
        }
        self.revision = changeset.to_revision;
        self.committed = self.data.clone();
        self.persist_changeset(&changeset)?;
        self.persist_baseline()?;

        Ok(self.revision)
    }

    fn terms_range<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Vec<(DocId, u64)>)> + 'a {
        self.data
            .terms
            .range::<String, _>((Bound::Included(prefix.to_owned()), Bound::Unbounded))
            .take_while(move |(term, _)| term.starts_with(prefix))
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::ReadOnly)
        }
    }

    fn record(&mut self, change: Change) {
        self.data.apply(&change);
        self.pending.push(change);
    }

    fn replay_wal(&mut self) -> Result<(), Error> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };

        loop {
            let file = path
                .join(WAL_DIR)
                .join(format!("changes.{}", self.revision + 1));
            if !file.exists() {
                break;
            }
            let changeset = Changeset::unserialise(&fs::read(&file)?)?;
            if changeset.uuid != self.uuid || changeset.from_revision != self.revision {
                return Err(Error::Corrupt("changeset does not follow baseline"));
            }
            for change in &changeset.changes {
                self.data.apply(change);
            }
            self.revision = changeset.to_revision;
        }

        self.committed = self.data.clone();
        Ok(())
    }

    fn persist_changeset(&self, changeset: &Changeset) -> Result<(), Error> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let wal = path.join(WAL_DIR);
        fs::create_dir_all(&wal)?;
        fs::write(
            wal.join(format!("changes.{}", changeset.to_revision)),
            changeset.serialise(),
        )?;
        Ok(())
    }

    fn persist_baseline(&self) -> Result<(), Error> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let mut buf = Vec::new();
        buf.extend_from_slice(BASELINE_MAGIC);
        serialise_string(&mut buf, self.uuid.as_bytes());
        serialise_length(&mut buf, self.revision);

        let mut docids: Vec<_> = self.committed.docs.keys().copied().collect();
        docids.sort_unstable();
        serialise_length(&mut buf, docids.len() as u64);
        for docid in docids {
            serialise_length(&mut buf, docid);
            serialise_string(&mut buf, &self.committed.docs[&docid].serialise());
        }

        serialise_length(&mut buf, self.committed.metadata.len() as u64);
        for (key, value) in &self.committed.metadata {
            serialise_string(&mut buf, key.as_bytes());
            serialise_string(&mut buf, value);
        }

        serialise_length(&mut buf, self.committed.spellings.len() as u64);
        for (term, freq) in &self.committed.spellings {
            serialise_string(&mut buf, term.as_bytes());
            serialise_length(&mut buf, *freq);
        }

        serialise_length(&mut buf, self.committed.next_docid);

        // Write-then-rename so readers never see a torn baseline.
        let baseline = path.join(BASELINE_FILE);
        let staged = path.join(format!("{}.new", BASELINE_FILE));
        fs::write(&staged, &buf)?;
        fs::rename(&staged, &baseline)?;
        Ok(())
    }
}

fn load_baseline(path: &Path) -> Result<(String, u64, Data), Error> {
    let buf = fs::read(path)?;
    let rest = buf
        .strip_prefix(BASELINE_MAGIC)
        .ok_or(Error::Corrupt("bad baseline magic"))?;
    let p = &mut &rest[..];

    let uuid = String::from_utf8(unserialise_string(p)?.to_vec())
        .map_err(|_| Error::Corrupt("baseline uuid is not utf-8"))?;
    let revision = unserialise_length(p, false)?;

    let mut data = Data::new();
    let ndocs = unserialise_length(p, false)?;
    for _ in 0..ndocs {
        let docid = unserialise_length(p, false)?;
        let document = Document::unserialise(unserialise_string(p)?)?;
        data.index_document(docid, document);
    }

    let nmeta = unserialise_length(p, false)?;
    for _ in 0..nmeta {
        let key = String::from_utf8(unserialise_string(p)?.to_vec())
            .map_err(|_| Error::Corrupt("metadata key is not utf-8"))?;
        let value = unserialise_string(p)?.to_vec();
        data.metadata.insert(key, value);
    }

    let nspellings = unserialise_length(p, false)?;
    for _ in 0..nspellings {
        let term = String::from_utf8(unserialise_string(p)?.to_vec())
            .map_err(|_| Error::Corrupt("spelling term is not utf-8"))?;
        let freq = unserialise_length(p, false)?;
        data.spellings.insert(term, freq);
    }

    data.next_docid = unserialise_length(p, false)?.max(data.next_docid);

    Ok((uuid, revision, data))
}

/// Read just the revision out of a baseline file.
fn baseline_revision(path: &Path) -> Result<u64, Error> {
    let buf = fs::read(path)?;
    let rest = buf
        .strip_prefix(BASELINE_MAGIC)
        .ok_or(Error::Corrupt("bad baseline magic"))?;
    let p = &mut &rest[..];
    let _uuid = unserialise_string(p)?;
    Ok(unserialise_length(p, false)?)
}

fn newest_wal_revision(path: &Path) -> Result<Option<u64>, Error> {
    let wal = path.join(WAL_DIR);
    if !wal.exists() {
        return Ok(None);
    }

    let mut newest = None;
    for entry in fs::read_dir(&wal)? {
        let name = entry?.file_name();
        if let Some(revision) = name
            .to_str()
            .and_then(|name| name.strip_prefix("changes."))
            .and_then(|rev| rev.parse::<u64>().ok())
        {
            newest = newest.max(Some(revision));
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod test {
    use super::*;

    fn doc(body: &str) -> Document {
        let mut document = Document::new(body.as_bytes());
        for (position, word) in body.split_whitespace().enumerate() {
            document.add_position(word, position as u64 + 1);
        }
        document
    }

    #[test]
    fn test_add_and_read() {
        let mut index = Index::memory();
        let docid = index.add_document(doc("hello world hello")).unwrap();
        assert_eq!(docid, 1);

        assert_eq!(index.doccount(), 1);
        assert!(index.term_exists("hello"));
        assert_eq!(index.termfreq("hello"), 1);
        assert_eq!(index.collfreq("hello"), 2);
        assert_eq!(index.doclength(1).unwrap(), 3);
        assert_eq!(index.unique_terms(1).unwrap(), 2);
        assert!(index.has_positions());
        assert_eq!(index.positionlist(1, "hello").unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_cancel_rolls_back() {
        let mut index = Index::memory();
        index.add_document(doc("kept")).unwrap();
        index.commit().unwrap();

        index.add_document(doc("discarded")).unwrap();
        index.set_metadata("key", b"value").unwrap();
        index.cancel();

        assert_eq!(index.doccount(), 1);
        assert!(index.metadata("key").is_empty());
        assert!(!index.term_exists("discarded"));
    }

    #[test]
    fn test_commit_bumps_revision_once() {
        let mut index = Index::memory();
        assert_eq!(index.commit().unwrap(), 0); // nothing pending

        index.add_document(doc("one")).unwrap();
        index.add_document(doc("two")).unwrap();
        assert_eq!(index.commit().unwrap(), 1);
        assert_eq!(index.commit().unwrap(), 1);
    }

    #[test]
    fn test_delete_document() {
        let mut index = Index::memory();
        let docid = index.add_document(doc("ephemeral entry")).unwrap();
        index.delete_document(docid).unwrap();

        assert_eq!(index.doccount(), 0);
        assert!(!index.term_exists("ephemeral"));
        assert_eq!(index.total_length(), 0);
        assert!(matches!(
            index.delete_document(docid),
            Err(Error::DocNotFound(_))
        ));
    }

    #[test]
    fn test_replace_by_unique_term() {
        let mut index = Index::memory();
        let mut first = doc("original");
        first.add_term("Qid:1", 1);
        let docid = index.add_document(first).unwrap();

        let mut second = doc("replacement");
        second.add_term("Qid:1", 1);
        let replaced = index.replace_document_term("Qid:1", second).unwrap();

        assert_eq!(replaced, docid);
        assert_eq!(index.doccount(), 1);
        assert!(index.term_exists("replacement"));
        assert!(!index.term_exists("original"));

        // Unknown unique term adds instead.
        let mut third = doc("fresh");
        third.add_term("Qid:2", 1);
        let added = index.replace_document_term("Qid:2", third).unwrap();
        assert_ne!(added, docid);
        assert_eq!(index.doccount(), 2);
    }

    #[test]
    fn test_all_terms_prefix() {
        let mut index = Index::memory();
        index.add_document(doc("apple apply apricot banana")).unwrap();

        let terms: Vec<_> = index
            .all_terms("ap")
            .into_iter()
            .map(|(term, _)| term)
            .collect();
        assert_eq!(terms, ["apple", "apply", "apricot"]);
        assert_eq!(index.all_terms("zz"), vec![]);
    }

    #[test]
    fn test_metadata() {
        let mut index = Index::memory();
        index.set_metadata("schema", b"v1").unwrap();
        index.set_metadata("schema.version", b"1").unwrap();
        index.set_metadata("other", b"x").unwrap();

        assert_eq!(index.metadata("schema"), b"v1");
        assert!(index.metadata("missing").is_empty());
        assert_eq!(index.metadata_keys("schema"), ["schema", "schema.version"]);

        index.set_metadata("schema", b"").unwrap();
        assert_eq!(index.metadata_keys("schema"), ["schema.version"]);
    }

    #[test]
    fn test_spellings() {
        let mut index = Index::memory();
        index.add_spelling("ferret", 3).unwrap();
        assert_eq!(index.spelling_freq("ferret"), 3);

        assert_eq!(index.remove_spelling("ferret", 2).unwrap(), 2);
        assert_eq!(index.spelling_freq("ferret"), 1);

        // Removing more than present removes what's there.
        assert_eq!(index.remove_spelling("ferret", 10).unwrap(), 1);
        assert_eq!(index.spelling_freq("ferret"), 0);
        assert_eq!(index.remove_spelling("ferret", 1).unwrap(), 0);
    }

    #[test]
    fn test_value_stats() {
        let mut index = Index::memory();
        let mut a = doc("a");
        a.set_value(3, &b"2020"[..]);
        let mut b = doc("b");
        b.set_value(3, &b"2026"[..]);
        index.add_document(a).unwrap();
        index.add_document(b).unwrap();

        assert_eq!(index.value_freq(3), 2);
        assert_eq!(index.value_lower_bound(3), b"2020");
        assert_eq!(index.value_upper_bound(3), b"2026");
        assert_eq!(index.value_freq(9), 0);
    }

    #[test]
    fn test_readable_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        Index::open(dir.path(), true, true).unwrap();

        let mut readable = Index::open(dir.path(), false, false).unwrap();
        assert!(matches!(
            readable.add_document(doc("nope")),
            Err(Error::ReadOnly)
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let uuid = {
            let mut index = Index::open(dir.path(), true, true).unwrap();
            index.add_document(doc("persisted document")).unwrap();
            index.set_metadata("schema", b"v1").unwrap();
            index.commit().unwrap();
            index.uuid().to_owned()
        };

        let index = Index::open(dir.path(), false, false).unwrap();
        assert_eq!(index.uuid(), uuid);
        assert_eq!(index.revision(), 1);
        assert_eq!(index.doccount(), 1);
        assert!(index.term_exists("persisted"));
        assert_eq!(index.metadata("schema"), b"v1");
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Index::open(&dir.path().join("absent"), false, false),
            Err(Error::DoesNotExist(_))
        ));
    }

    #[test]
    fn test_reopen_sees_new_revision() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Index::open(dir.path(), true, true).unwrap();
        let mut reader = Index::open(dir.path(), false, false).unwrap();

        assert!(!reader.reopen().unwrap());

        writer.add_document(doc("news")).unwrap();
        writer.commit().unwrap();

        assert!(reader.reopen().unwrap());
        assert_eq!(reader.revision(), 1);
        assert!(reader.term_exists("news"));
        assert!(!reader.reopen().unwrap());
    }

    #[test]
    fn test_changesets_and_replay() {
        let source_dir = tempfile::tempdir().unwrap();
        let mut source = Index::open(source_dir.path(), true, true).unwrap();

        source.add_document(doc("first commit")).unwrap();
        source.commit().unwrap();
        source.add_document(doc("second commit")).unwrap();
        source.commit().unwrap();

        let files = source.changesets_from(0).unwrap();
        assert_eq!(files.len(), 2);

        // Replica adopts the source baseline at revision 0 by copying
        // the uuid, then replays both changesets.
        let replica_dir = tempfile::tempdir().unwrap();
        let mut replica = Index::open(replica_dir.path(), true, true).unwrap();
        replica.uuid = source.uuid().to_owned();

        for file in &files {
            let bytes = std::fs::read(file).unwrap();
            replica.apply_changeset(&bytes).unwrap();
        }

        assert_eq!(replica.revision(), 2);
        assert_eq!(replica.doccount(), 2);
        assert!(replica.term_exists("second"));

        // Replay is strict about ordering.
        let bytes = std::fs::read(&files[0]).unwrap();
        assert!(matches!(
            replica.apply_changeset(&bytes),
            Err(Error::RevisionMismatch { .. })
        ));
    }

    #[test]
    fn test_changesets_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), true, true).unwrap();
        index.add_document(doc("one")).unwrap();
        index.commit().unwrap();

        std::fs::remove_file(dir.path().join(WAL_DIR).join("changes.1")).unwrap();
        assert!(index.changesets_from(0).is_err());
    }
}
