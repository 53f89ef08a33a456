//! Changesets.
//!
//! Every commit appends one changeset: the list of operations that
//! took the index from one revision to the next. Changesets replay on
//! replicas byte for byte, so the encoding reuses the length codec.

use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};

use super::document::{DocId, Document};
use super::Error;

const CHANGESET_MAGIC: &[u8] = b"ferret-changes\x01";

/// One mutation, as recorded between commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    AddDocument { docid: DocId, document: Document },
    ReplaceDocument { docid: DocId, document: Document },
    DeleteDocument { docid: DocId },
    SetMetadata { key: String, value: Vec<u8> },
    AddSpelling { term: String, freq: u64 },
    RemoveSpelling { term: String, freq: u64 },
}

impl Change {
    fn code(&self) -> u8 {
        match self {
            Change::AddDocument { .. } => 0,
            Change::ReplaceDocument { .. } => 1,
            Change::DeleteDocument { .. } => 2,
            Change::SetMetadata { .. } => 3,
            Change::AddSpelling { .. } => 4,
            Change::RemoveSpelling { .. } => 5,
        }
    }
}

/// A replayable batch of changes: `uuid`, the revision span
/// `(from, to]`, and the operations in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub uuid: String,
    pub from_revision: u64,
    pub to_revision: u64,
    pub changes: Vec<Change>,
}

impl Changeset {
    pub fn serialise(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(CHANGESET_MAGIC);
        serialise_string(&mut buf, self.uuid.as_bytes());
        serialise_length(&mut buf, self.from_revision);
        serialise_length(&mut buf, self.to_revision);
        serialise_length(&mut buf, self.changes.len() as u64);

        for change in &self.changes {
            buf.push(change.code());
            match change {
                Change::AddDocument { docid, document }
                | Change::ReplaceDocument { docid, document } => {
                    serialise_length(&mut buf, *docid);
                    serialise_string(&mut buf, &document.serialise());
                }
                Change::DeleteDocument { docid } => {
                    serialise_length(&mut buf, *docid);
                }
                Change::SetMetadata { key, value } => {
                    serialise_string(&mut buf, key.as_bytes());
                    serialise_string(&mut buf, value);
                }
                Change::AddSpelling { term, freq } | Change::RemoveSpelling { term, freq } => {
                    serialise_string(&mut buf, term.as_bytes());
                    serialise_length(&mut buf, *freq);
                }
            }
        }

        buf
    }

    pub fn unserialise(buf: &[u8]) -> Result<Self, Error> {
        let rest = buf
            .strip_prefix(CHANGESET_MAGIC)
            .ok_or(Error::Corrupt("bad changeset magic"))?;
        let p = &mut &rest[..];

        let uuid = utf8(unserialise_string(p)?)?;
        let from_revision = unserialise_length(p, false)?;
        let to_revision = unserialise_length(p, false)?;
        let count = unserialise_length(p, false)?;

        let mut changes = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let (&code, rest) = p
                .split_first()
                .ok_or(Error::Corrupt("truncated changeset"))?;
            *p = rest;

            let change = match code {
                0 | 1 => {
                    let docid = unserialise_length(p, false)?;
                    let document = Document::unserialise(unserialise_string(p)?)?;
                    if code == 0 {
                        Change::AddDocument { docid, document }
                    } else {
                        Change::ReplaceDocument { docid, document }
                    }
                }
                2 => Change::DeleteDocument {
                    docid: unserialise_length(p, false)?,
                },
                3 => Change::SetMetadata {
                    key: utf8(unserialise_string(p)?)?,
                    value: unserialise_string(p)?.to_vec(),
                },
                4 | 5 => {
                    let term = utf8(unserialise_string(p)?)?;
                    let freq = unserialise_length(p, false)?;
                    if code == 4 {
                        Change::AddSpelling { term, freq }
                    } else {
                        Change::RemoveSpelling { term, freq }
                    }
                }
                _ => return Err(Error::Corrupt("unknown change code")),
            };
            changes.push(change);
        }

        Ok(Self {
            uuid,
            from_revision,
            to_revision,
            changes,
        })
    }
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Corrupt("invalid utf-8"))
}
