//! Remote protocol client.
//!
//! The client half of the binary protocol: connects to a peer node,
//! configures access and drives the message/reply tables. Inter-node
//! queries and the protocol tests both go through this.

use std::collections::BTreeMap;

use tokio::net::TcpStream;
use tracing::trace;

use crate::engine::{DocId, Document, MSet, MatchStats, Query};
use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};
use crate::net::{Frame, FrameStream};

use super::error::Error;
use super::messages::{RemoteMessage, RemoteReply};

/// Aggregate shard stats carried by `Update` replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseInfo {
    pub major: u8,
    pub minor: u8,
    pub doccount: u64,
    pub lastdocid: u64,
    pub doclength_lower_bound: u64,
    pub doclength_upper_bound: u64,
    pub has_positions: bool,
    pub total_length: u64,
    pub uuid: String,
}

/// One client connection to a remote node.
pub struct RemoteClient {
    stream: FrameStream,
    /// How many spies the last query registered; `get_mset` needs it
    /// to split the results payload.
    spies: usize,
}

impl RemoteClient {
    /// Connect and consume the server greeting.
    pub async fn connect(addr: &str) -> Result<(Self, DatabaseInfo), Error> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(crate::net::Error::Io)?;
        let mut client = Self {
            stream: FrameStream::new(stream),
            spies: 0,
        };

        let frame = client.read(RemoteReply::Update).await?;
        let info = parse_update(&frame.payload)?;
        trace!("connected, peer speaks {}.{}", info.major, info.minor);
        Ok((client, info))
    }

    /// Configure the read endpoint set.
    pub async fn read_access(
        &mut self,
        create_or_open: bool,
        uris: &[&str],
    ) -> Result<DatabaseInfo, Error> {
        let payload = access_payload(create_or_open, uris);
        let frame = self.call(RemoteMessage::ReadAccess, payload).await?;
        parse_update(&frame.payload)
    }

    /// Configure the single writable endpoint.
    pub async fn write_access(
        &mut self,
        create_or_open: bool,
        uri: &str,
    ) -> Result<DatabaseInfo, Error> {
        let payload = access_payload(create_or_open, &[uri]);
        let frame = self.call(RemoteMessage::WriteAccess, payload).await?;
        parse_update(&frame.payload)
    }

    pub async fn update(&mut self) -> Result<DatabaseInfo, Error> {
        let frame = self.call(RemoteMessage::Update, vec![]).await?;
        parse_update(&frame.payload)
    }

    /// True iff the remote revision advanced.
    pub async fn reopen(&mut self) -> Result<bool, Error> {
        self.send(RemoteMessage::Reopen, vec![]).await?;
        let frame = self.read_any().await?;
        match RemoteReply::try_from(frame.code)? {
            RemoteReply::Update => Ok(true),
            RemoteReply::Done => Ok(false),
            _ => Err(unexpected(frame.code)),
        }
    }

    pub async fn keep_alive(&mut self) -> Result<(), Error> {
        self.call(RemoteMessage::KeepAlive, vec![]).await?;
        Ok(())
    }

    // Documents.

    pub async fn add_document(&mut self, document: &Document) -> Result<DocId, Error> {
        let frame = self
            .call(RemoteMessage::AddDocument, document.serialise())
            .await?;
        parse_varint(&frame.payload)
    }

    /// Silent on the wire.
    pub async fn replace_document(
        &mut self,
        docid: DocId,
        document: &Document,
    ) -> Result<(), Error> {
        let mut payload = varint(docid);
        payload.extend_from_slice(&document.serialise());
        self.send(RemoteMessage::ReplaceDocument, payload).await
    }

    pub async fn replace_document_term(
        &mut self,
        term: &str,
        document: &Document,
    ) -> Result<DocId, Error> {
        let mut payload = vec![];
        serialise_string(&mut payload, term.as_bytes());
        payload.extend_from_slice(&document.serialise());
        let frame = self
            .call(RemoteMessage::ReplaceDocumentTerm, payload)
            .await?;
        parse_varint(&frame.payload)
    }

    pub async fn delete_document(&mut self, docid: DocId) -> Result<(), Error> {
        self.call(RemoteMessage::DeleteDocument, varint(docid))
            .await?;
        Ok(())
    }

    /// Silent on the wire.
    pub async fn delete_document_term(&mut self, term: &str) -> Result<(), Error> {
        self.send(RemoteMessage::DeleteDocumentTerm, term.as_bytes().to_vec())
            .await
    }

    pub async fn get_document(
        &mut self,
        docid: DocId,
    ) -> Result<(Vec<u8>, BTreeMap<u64, Vec<u8>>), Error> {
        self.send(RemoteMessage::Document, varint(docid)).await?;

        let data = self.read(RemoteReply::DocData).await?.payload.to_vec();
        let mut values = BTreeMap::new();
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::Value => {
                    let p = &mut &frame.payload[..];
                    let slot = unserialise_length(p, false)?;
                    values.insert(slot, p.to_vec());
                }
                RemoteReply::Done => return Ok((data, values)),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    pub async fn commit(&mut self) -> Result<(), Error> {
        self.call(RemoteMessage::Commit, vec![]).await?;
        Ok(())
    }

    pub async fn cancel(&mut self) -> Result<(), Error> {
        self.call(RemoteMessage::Cancel, vec![]).await?;
        Ok(())
    }

    // Term statistics.

    pub async fn term_exists(&mut self, term: &str) -> Result<bool, Error> {
        self.send(RemoteMessage::TermExists, term.as_bytes().to_vec())
            .await?;
        let frame = self.read_any().await?;
        match RemoteReply::try_from(frame.code)? {
            RemoteReply::TermExists => Ok(true),
            RemoteReply::TermDoesntExist => Ok(false),
            _ => Err(unexpected(frame.code)),
        }
    }

    pub async fn term_freq(&mut self, term: &str) -> Result<u64, Error> {
        let frame = self
            .call(RemoteMessage::TermFreq, term.as_bytes().to_vec())
            .await?;
        parse_varint(&frame.payload)
    }

    pub async fn coll_freq(&mut self, term: &str) -> Result<u64, Error> {
        let frame = self
            .call(RemoteMessage::CollFreq, term.as_bytes().to_vec())
            .await?;
        parse_varint(&frame.payload)
    }

    pub async fn freqs(&mut self, term: &str) -> Result<(u64, u64), Error> {
        let frame = self
            .call(RemoteMessage::Freqs, term.as_bytes().to_vec())
            .await?;
        let p = &mut &frame.payload[..];
        Ok((
            unserialise_length(p, false)?,
            unserialise_length(p, false)?,
        ))
    }

    pub async fn doc_length(&mut self, docid: DocId) -> Result<u64, Error> {
        let frame = self.call(RemoteMessage::DocLength, varint(docid)).await?;
        parse_varint(&frame.payload)
    }

    pub async fn unique_terms(&mut self, docid: DocId) -> Result<u64, Error> {
        let frame = self.call(RemoteMessage::UniqueTerms, varint(docid)).await?;
        parse_varint(&frame.payload)
    }

    /// (value frequency, lower bound, upper bound) per requested slot.
    pub async fn value_stats(
        &mut self,
        slots: &[u64],
    ) -> Result<Vec<(u64, Vec<u8>, Vec<u8>)>, Error> {
        let mut payload = vec![];
        for &slot in slots {
            serialise_length(&mut payload, slot);
        }
        self.send(RemoteMessage::ValueStats, payload).await?;

        let mut stats = vec![];
        for _ in slots {
            let frame = self.read(RemoteReply::ValueStats).await?;
            let p = &mut &frame.payload[..];
            let freq = unserialise_length(p, false)?;
            let lower = unserialise_string(p)?.to_vec();
            let upper = unserialise_string(p)?.to_vec();
            stats.push((freq, lower, upper));
        }
        Ok(stats)
    }

    // Prefix-compressed streams.

    /// Terms under a prefix with their term frequencies.
    pub async fn all_terms(&mut self, prefix: &str) -> Result<Vec<(String, u64)>, Error> {
        self.send(RemoteMessage::AllTerms, prefix.as_bytes().to_vec())
            .await?;

        let mut terms = vec![];
        let mut prev = prefix.as_bytes().to_vec();
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::AllTerms => {
                    let p = &mut &frame.payload[..];
                    let freq = unserialise_length(p, false)?;
                    let term = undo_prefix(&mut prev, p)?;
                    terms.push((term, freq));
                }
                RemoteReply::Done => return Ok(terms),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    /// Document length plus (term, wdf, termfreq) entries.
    pub async fn term_list(
        &mut self,
        docid: DocId,
    ) -> Result<(u64, Vec<(String, u64, u64)>), Error> {
        self.send(RemoteMessage::TermList, varint(docid)).await?;

        let doclength = parse_varint(&self.read(RemoteReply::DocLength).await?.payload)?;
        let mut terms = vec![];
        let mut prev = vec![];
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::TermList => {
                    let p = &mut &frame.payload[..];
                    let wdf = unserialise_length(p, false)?;
                    let termfreq = unserialise_length(p, false)?;
                    let term = undo_prefix(&mut prev, p)?;
                    terms.push((term, wdf, termfreq));
                }
                RemoteReply::Done => return Ok((doclength, terms)),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    pub async fn metadata_keys(&mut self, prefix: &str) -> Result<Vec<String>, Error> {
        self.send(RemoteMessage::MetadataKeyList, prefix.as_bytes().to_vec())
            .await?;

        let mut keys = vec![];
        let mut prev = prefix.as_bytes().to_vec();
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::MetadataKeyList => {
                    let p = &mut &frame.payload[..];
                    keys.push(undo_prefix(&mut prev, p)?);
                }
                RemoteReply::Done => return Ok(keys),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    pub async fn position_list(&mut self, docid: DocId, term: &str) -> Result<Vec<u64>, Error> {
        let mut payload = varint(docid);
        payload.extend_from_slice(term.as_bytes());
        self.send(RemoteMessage::PositionList, payload).await?;

        let mut positions = vec![];
        let mut last = None;
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::PositionList => {
                    let delta = parse_varint(&frame.payload)?;
                    let position = match last {
                        None => delta,
                        Some(last) => last + delta + 1,
                    };
                    positions.push(position);
                    last = Some(position);
                }
                RemoteReply::Done => return Ok(positions),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    pub async fn position_list_count(&mut self, docid: DocId, term: &str) -> Result<u64, Error> {
        let mut payload = varint(docid);
        payload.extend_from_slice(term.as_bytes());
        let frame = self.call(RemoteMessage::PositionListCount, payload).await?;
        parse_varint(&frame.payload)
    }

    /// ((termfreq, collfreq), delta-decoded postings).
    pub async fn post_list(
        &mut self,
        term: &str,
    ) -> Result<((u64, u64), Vec<(DocId, u64)>), Error> {
        self.send(RemoteMessage::PostList, term.as_bytes().to_vec())
            .await?;

        let start = self.read(RemoteReply::PostListStart).await?;
        let p = &mut &start.payload[..];
        let freqs = (
            unserialise_length(p, false)?,
            unserialise_length(p, false)?,
        );

        let mut postings = vec![];
        let mut last = 0;
        loop {
            let frame = self.read_any().await?;
            match RemoteReply::try_from(frame.code)? {
                RemoteReply::PostListItem => {
                    let p = &mut &frame.payload[..];
                    let docid = last + unserialise_length(p, false)? + 1;
                    let wdf = unserialise_length(p, false)?;
                    postings.push((docid, wdf));
                    last = docid;
                }
                RemoteReply::Done => return Ok((freqs, postings)),
                _ => return Err(unexpected(frame.code)),
            }
        }
    }

    // Metadata and spellings.

    pub async fn get_metadata(&mut self, key: &str) -> Result<Vec<u8>, Error> {
        let frame = self
            .call(RemoteMessage::GetMetadata, key.as_bytes().to_vec())
            .await?;
        Ok(frame.payload.to_vec())
    }

    /// Silent on the wire.
    pub async fn set_metadata(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        let mut payload = vec![];
        serialise_string(&mut payload, key.as_bytes());
        payload.extend_from_slice(value);
        self.send(RemoteMessage::SetMetadata, payload).await
    }

    /// Silent on the wire.
    pub async fn add_spelling(&mut self, term: &str, freq: u64) -> Result<(), Error> {
        let mut payload = varint(freq);
        payload.extend_from_slice(term.as_bytes());
        self.send(RemoteMessage::AddSpelling, payload).await
    }

    pub async fn remove_spelling(&mut self, term: &str, freq: u64) -> Result<u64, Error> {
        let mut payload = varint(freq);
        payload.extend_from_slice(term.as_bytes());
        let frame = self.call(RemoteMessage::RemoveSpelling, payload).await?;
        parse_varint(&frame.payload)
    }

    // Queries: two round trips, stats pass through verbatim.

    pub async fn query(&mut self, query: &Query) -> Result<MatchStats, Error> {
        self.query_full(query, "bm25", &[], &[], &[]).await
    }

    pub async fn query_full(
        &mut self,
        query: &Query,
        weighting: &str,
        weighting_params: &[u8],
        rset: &[DocId],
        spies: &[(&str, Vec<u8>)],
    ) -> Result<MatchStats, Error> {
        let mut payload = vec![];
        serialise_string(&mut payload, &query.serialise());

        let mut rset_buf = vec![];
        let mut last = 0;
        for &docid in rset {
            serialise_length(&mut rset_buf, docid - last);
            last = docid;
        }
        serialise_string(&mut payload, &rset_buf);

        serialise_string(&mut payload, weighting.as_bytes());
        serialise_string(&mut payload, weighting_params);
        for (name, params) in spies {
            serialise_string(&mut payload, name.as_bytes());
            serialise_string(&mut payload, params);
        }

        self.spies = spies.len();
        let frame = self.call(RemoteMessage::Query, payload).await?;
        Ok(MatchStats::unserialise(&frame.payload)?)
    }

    /// Materialize the prepared query. Returns per-spy result blobs
    /// and the match set.
    pub async fn get_mset(
        &mut self,
        first: u64,
        maxitems: u64,
        check_at_least: u64,
        stats: &MatchStats,
    ) -> Result<(Vec<Vec<u8>>, MSet), Error> {
        let mut payload = varint(first);
        serialise_length(&mut payload, maxitems);
        serialise_length(&mut payload, check_at_least);
        payload.extend_from_slice(&stats.serialise());

        let frame = self.call(RemoteMessage::GetMset, payload).await?;
        let p = &mut &frame.payload[..];

        let mut spy_results = vec![];
        for _ in 0..self.spies {
            spy_results.push(unserialise_string(p)?.to_vec());
        }
        let mset = MSet::unserialise(*p)?;

        Ok((spy_results, mset))
    }

    /// Ask the server to close the connection.
    pub async fn shutdown(mut self) -> Result<(), Error> {
        self.send(RemoteMessage::Shutdown, vec![]).await
    }

    async fn send(&mut self, message: RemoteMessage, payload: Vec<u8>) -> Result<(), Error> {
        self.stream
            .send_flush(&Frame::new(u8::from(message), payload))
            .await
            .map_err(Error::Net)
    }

    async fn call(&mut self, message: RemoteMessage, payload: Vec<u8>) -> Result<Frame, Error> {
        self.send(message, payload).await?;
        self.read_any().await
    }

    /// Read one frame, surfacing exceptions as errors.
    async fn read_any(&mut self) -> Result<Frame, Error> {
        let frame = self.stream.read_frame().await.map_err(Error::Net)?;
        if frame.code == u8::from(RemoteReply::Exception) {
            let (_, _, message) = Error::unserialise(&frame.payload)?;
            return Err(Error::Remote(message));
        }
        Ok(frame)
    }

    async fn read(&mut self, expected: RemoteReply) -> Result<Frame, Error> {
        let frame = self.read_any().await?;
        if frame.code != u8::from(expected) {
            return Err(unexpected(frame.code));
        }
        Ok(frame)
    }
}

fn access_payload(create_or_open: bool, uris: &[&str]) -> Vec<u8> {
    let mut payload = varint(create_or_open as u64);
    for uri in uris {
        serialise_string(&mut payload, uri.as_bytes());
    }
    payload
}

fn parse_update(payload: &[u8]) -> Result<DatabaseInfo, Error> {
    let p = &mut &payload[..];
    let (&major, rest) = p
        .split_first()
        .ok_or(crate::net::Error::Serialisation("empty update payload"))?;
    let (&minor, rest) = rest
        .split_first()
        .ok_or(crate::net::Error::Serialisation("short update payload"))?;
    *p = rest;

    let mut info = DatabaseInfo {
        major,
        minor,
        ..Default::default()
    };

    if !p.is_empty() {
        info.doccount = unserialise_length(p, false)?;
        info.lastdocid = info.doccount + unserialise_length(p, false)?;
        info.doclength_lower_bound = unserialise_length(p, false)?;
        info.doclength_upper_bound =
            info.doclength_lower_bound + unserialise_length(p, false)?;
        let (&positions, rest) = p
            .split_first()
            .ok_or(crate::net::Error::Serialisation("short update payload"))?;
        *p = rest;
        info.has_positions = positions == b'1';
        info.total_length = unserialise_length(p, false)?;
        info.uuid = String::from_utf8_lossy(p).into_owned();
    }

    Ok(info)
}

/// Rebuild a term from a prefix-compressed entry and remember it for
/// the next one.
fn undo_prefix(prev: &mut Vec<u8>, p: &mut &[u8]) -> Result<String, Error> {
    let (&reuse, suffix) = p
        .split_first()
        .ok_or(crate::net::Error::Serialisation("empty stream entry"))?;
    *p = &[];

    prev.truncate(255);
    let reuse = (reuse as usize).min(prev.len());
    let mut term = prev[..reuse].to_vec();
    term.extend_from_slice(suffix);

    *prev = term.clone();
    String::from_utf8(term).map_err(|_| Error::Remote("stream term is not utf-8".into()))
}

fn unexpected(code: u8) -> Error {
    Error::Remote(format!("unexpected reply type {}", code))
}

fn varint(value: u64) -> Vec<u8> {
    let mut buf = vec![];
    serialise_length(&mut buf, value);
    buf
}

fn parse_varint(payload: &[u8]) -> Result<u64, Error> {
    let p = &mut &payload[..];
    Ok(unserialise_length(p, false)?)
}
