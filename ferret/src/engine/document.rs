//! Documents.
//!
//! A document is opaque data plus the posting terms and value slots
//! the index keeps for it. The byte layout reuses the wire length
//! codec so documents travel unchanged between disk and protocol.

use std::collections::BTreeMap;

use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};

use super::Error;

/// Document identifier. Valid ids start at 1.
pub type DocId = u64;

/// One term posted on a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Posting {
    pub term: String,
    /// Within-document frequency.
    pub wdf: u64,
    /// Term positions, ascending.
    pub positions: Vec<u64>,
}

/// An indexable document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// Opaque document data.
    pub data: Vec<u8>,
    /// Posting terms, sorted by term.
    pub terms: Vec<Posting>,
    /// Value slots.
    pub values: BTreeMap<u64, Vec<u8>>,
}

impl Document {
    /// New document with opaque data only.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Post a term, merging with an existing posting.
    pub fn add_term(&mut self, term: impl ToString, wdf: u64) -> &mut Self {
        self.add_posting(term, wdf, None)
    }

    /// Post a term at a position.
    pub fn add_position(&mut self, term: impl ToString, position: u64) -> &mut Self {
        self.add_posting(term, 1, Some(position))
    }

    /// Set a value slot.
    pub fn set_value(&mut self, slot: u64, value: impl Into<Vec<u8>>) -> &mut Self {
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&slot);
        } else {
            self.values.insert(slot, value);
        }
        self
    }

    /// Sum of all within-document frequencies.
    pub fn length(&self) -> u64 {
        self.terms.iter().map(|posting| posting.wdf).sum()
    }

    /// Number of distinct terms.
    pub fn unique_terms(&self) -> u64 {
        self.terms.len() as u64
    }

    /// Look a posting up by term.
    pub fn posting(&self, term: &str) -> Option<&Posting> {
        self.terms
            .binary_search_by(|posting| posting.term.as_str().cmp(term))
            .ok()
            .map(|found| &self.terms[found])
    }

    fn add_posting(&mut self, term: impl ToString, wdf: u64, position: Option<u64>) -> &mut Self {
        let term = term.to_string();
        let index = match self
            .terms
            .binary_search_by(|posting| posting.term.cmp(&term))
        {
            Ok(found) => {
                self.terms[found].wdf += wdf;
                found
            }
            Err(insert) => {
                self.terms.insert(
                    insert,
                    Posting {
                        term,
                        wdf,
                        positions: vec![],
                    },
                );
                insert
            }
        };

        if let Some(position) = position {
            let positions = &mut self.terms[index].positions;
            if let Err(at) = positions.binary_search(&position) {
                positions.insert(at, position);
            }
        }

        self
    }

    /// Byte encoding: data, then postings, then values.
    pub fn serialise(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 64);
        serialise_string(&mut buf, &self.data);

        serialise_length(&mut buf, self.terms.len() as u64);
        for posting in &self.terms {
            serialise_string(&mut buf, posting.term.as_bytes());
            serialise_length(&mut buf, posting.wdf);
            serialise_length(&mut buf, posting.positions.len() as u64);
            let mut last = 0;
            for &position in &posting.positions {
                // Delta encoded; positions are ascending.
                serialise_length(&mut buf, position - last);
                last = position;
            }
        }

        serialise_length(&mut buf, self.values.len() as u64);
        for (&slot, value) in &self.values {
            serialise_length(&mut buf, slot);
            serialise_string(&mut buf, value);
        }

        buf
    }

    /// Decode a document serialised with [`Self::serialise`].
    pub fn unserialise(mut p: &[u8]) -> Result<Self, Error> {
        let p = &mut p;
        let data = unserialise_string(p)?.to_vec();

        let nterms = unserialise_length(p, false)?;
        let mut terms = Vec::with_capacity(nterms.min(1024) as usize);
        for _ in 0..nterms {
            let term = String::from_utf8(unserialise_string(p)?.to_vec())
                .map_err(|_| Error::Corrupt("posting term is not utf-8"))?;
            let wdf = unserialise_length(p, false)?;
            let npositions = unserialise_length(p, false)?;
            let mut positions = Vec::with_capacity(npositions.min(1024) as usize);
            let mut last = 0;
            for _ in 0..npositions {
                last += unserialise_length(p, false)?;
                positions.push(last);
            }
            terms.push(Posting {
                term,
                wdf,
                positions,
            });
        }

        let nvalues = unserialise_length(p, false)?;
        let mut values = BTreeMap::new();
        for _ in 0..nvalues {
            let slot = unserialise_length(p, false)?;
            let value = unserialise_string(p)?.to_vec();
            values.insert(slot, value);
        }

        Ok(Self {
            data,
            terms,
            values,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new(&b"subject: hello"[..]);
        doc.add_position("hello", 1)
            .add_position("world", 2)
            .add_term("greeting", 3)
            .set_value(0, &b"2026-08-01"[..])
            .set_value(7, &b"sort-key"[..]);
        doc
    }

    #[test]
    fn test_terms_sorted_and_merged() {
        let doc = sample();
        let terms: Vec<_> = doc.terms.iter().map(|p| p.term.as_str()).collect();
        assert_eq!(terms, ["greeting", "hello", "world"]);

        let mut doc = doc;
        doc.add_term("hello", 2);
        assert_eq!(doc.posting("hello").unwrap().wdf, 3);
    }

    #[test]
    fn test_length_and_unique_terms() {
        let doc = sample();
        assert_eq!(doc.length(), 5);
        assert_eq!(doc.unique_terms(), 3);
    }

    #[test]
    fn test_serialise_round_trip() {
        let doc = sample();
        let decoded = Document::unserialise(&doc.serialise()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_empty_document_round_trip() {
        let doc = Document::default();
        let decoded = Document::unserialise(&doc.serialise()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_unserialise_garbage() {
        assert!(Document::unserialise(&[0xFF]).is_err());
    }

    #[test]
    fn test_empty_value_clears_slot() {
        let mut doc = sample();
        doc.set_value(0, &b""[..]);
        assert!(!doc.values.contains_key(&0));
    }
}
