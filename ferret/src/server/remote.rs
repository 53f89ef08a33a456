//! Remote binary protocol server.
//!
//! One instance per accepted connection. The connection starts in
//! `InitRemote`, writes one unsolicited `Update` reply, then moves to
//! `RemoteServer` for good and dispatches inbound messages. Domain
//! errors are serialized as `Exception` replies and the loop
//! continues; network and framing errors detach the connection.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, error, trace};

use crate::backend::endpoint::{Endpoint, Endpoints};
use crate::backend::pool::{Guard, Pool, Request};
use crate::backend::shard::Flags;
use crate::engine::query::Enquire;
use crate::engine::{Document, MatchStats, Query, Registry};
use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};
use crate::net::{Frame, FrameStream};

use super::error::Error;
use super::messages::{
    RemoteMessage, RemoteReply, RemoteState, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION,
};

/// Deadline for every pool acquisition made on behalf of a message.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix reuse in stream replies is a single byte.
const MAX_PREFIX_REUSE: usize = 255;

/// A query prepared by `Query`, consumed by `GetMset`. The shard stays
/// checked out between the two round trips.
struct PreparedQuery {
    enquire: Enquire,
    guard: Guard,
}

/// Remote protocol connection handler.
pub struct RemoteProtocol {
    pool: Pool,
    stream: FrameStream,
    state: RemoteState,
    flags: Flags,
    endpoints: Endpoints,
    registry: Registry,
    query: Option<PreparedQuery>,
}

impl RemoteProtocol {
    pub fn new(pool: Pool, stream: FrameStream) -> Self {
        Self {
            pool,
            stream,
            state: RemoteState::InitRemote,
            flags: Flags::OPEN,
            endpoints: Endpoints::new(),
            registry: Registry::default(),
            query: None,
        }
    }

    /// Accept-loop entry point.
    pub async fn handle(pool: Pool, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let protocol = Self::new(pool, FrameStream::new(stream));
        match protocol.run().await {
            Ok(()) => trace!("remote client disconnected {:?}", peer),
            Err(err) => error!("remote client crashed {:?}: {}", peer, err),
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        debug_assert_eq!(self.state, RemoteState::InitRemote);

        // The greeting: one unsolicited Update summarizing the (still
        // empty) endpoint set and carrying the protocol version.
        self.reply_update().await?;
        self.stream.flush().await.map_err(Error::Net)?;
        self.state = RemoteState::RemoteServer;

        loop {
            let frame = match self.stream.read_frame().await {
                Ok(frame) => frame,
                Err(crate::net::Error::Eof) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            let context = RemoteMessage::try_from(frame.code)
                .map(|message| message.as_str())
                .unwrap_or("unknown");
            trace!("dispatching {} [{} bytes]", context, frame.payload.len());

            match self.dispatch(frame).await {
                Ok(true) => {
                    self.stream.flush().await.map_err(Error::Net)?;
                }
                Ok(false) => {
                    let _ = self.stream.flush().await;
                    return Ok(());
                }
                Err(err) if err.fatal() => return Err(err),
                Err(err) if err.network_timeout() => {
                    // The peer may not be listening anymore; one
                    // best-effort exception, then detach.
                    let _ = self
                        .send(RemoteReply::Exception, err.serialise(context))
                        .await;
                    let _ = self.stream.flush().await;
                    return Err(err);
                }
                Err(err) => {
                    debug!("{}: {}", context, err);
                    self.send(RemoteReply::Exception, err.serialise(context))
                        .await?;
                    self.stream.flush().await.map_err(Error::Net)?;
                }
            }
        }
    }

    /// Returns false when the connection should close.
    async fn dispatch(&mut self, frame: Frame) -> Result<bool, Error> {
        let message = RemoteMessage::try_from(frame.code)?;
        let payload = frame.payload;

        // Every message except the second half of a query round trip
        // abandons any prepared query (and its checkout).
        if message != RemoteMessage::GetMset {
            self.reset();
        }

        match message {
            RemoteMessage::AllTerms => self.msg_allterms(&payload).await?,
            RemoteMessage::CollFreq => self.msg_collfreq(&payload).await?,
            RemoteMessage::Document => self.msg_document(&payload).await?,
            RemoteMessage::TermExists => self.msg_termexists(&payload).await?,
            RemoteMessage::TermFreq => self.msg_termfreq(&payload).await?,
            RemoteMessage::ValueStats => self.msg_valuestats(&payload).await?,
            RemoteMessage::KeepAlive => self.msg_keepalive().await?,
            RemoteMessage::DocLength => self.msg_doclength(&payload).await?,
            RemoteMessage::Query => self.msg_query(&payload).await?,
            RemoteMessage::TermList => self.msg_termlist(&payload).await?,
            RemoteMessage::PositionList => self.msg_positionlist(&payload).await?,
            RemoteMessage::PostList => self.msg_postlist(&payload).await?,
            RemoteMessage::Reopen => self.msg_reopen().await?,
            RemoteMessage::Update => self.reply_update().await?,
            RemoteMessage::AddDocument => self.msg_adddocument(&payload).await?,
            RemoteMessage::Cancel => self.msg_cancel().await?,
            RemoteMessage::DeleteDocumentTerm => self.msg_deletedocumentterm(&payload).await?,
            RemoteMessage::Commit => self.msg_commit().await?,
            RemoteMessage::ReplaceDocument => self.msg_replacedocument(&payload).await?,
            RemoteMessage::ReplaceDocumentTerm => {
                self.msg_replacedocumentterm(&payload).await?
            }
            RemoteMessage::DeleteDocument => self.msg_deletedocument(&payload).await?,
            RemoteMessage::WriteAccess => self.msg_writeaccess(&payload).await?,
            RemoteMessage::GetMetadata => self.msg_getmetadata(&payload).await?,
            RemoteMessage::SetMetadata => self.msg_setmetadata(&payload).await?,
            RemoteMessage::AddSpelling => self.msg_addspelling(&payload).await?,
            RemoteMessage::RemoveSpelling => self.msg_removespelling(&payload).await?,
            RemoteMessage::GetMset => self.msg_getmset(&payload).await?,
            RemoteMessage::Shutdown => return Ok(false),
            RemoteMessage::MetadataKeyList => self.msg_metadatakeylist(&payload).await?,
            RemoteMessage::Freqs => self.msg_freqs(&payload).await?,
            RemoteMessage::UniqueTerms => self.msg_uniqueterms(&payload).await?,
            RemoteMessage::PositionListCount => self.msg_positionlistcount(&payload).await?,
            RemoteMessage::ReadAccess => self.msg_readaccess(&payload).await?,
        }

        Ok(true)
    }

    fn reset(&mut self) {
        self.query = None;
    }

    async fn send(&mut self, reply: RemoteReply, payload: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.stream
            .send(&Frame::new(u8::from(reply), payload.into()))
            .await
            .map_err(Error::Net)
    }

    async fn send_done(&mut self) -> Result<(), Error> {
        self.send(RemoteReply::Done, vec![]).await
    }

    fn request(&self) -> Request {
        Request::new(self.flags, CHECKOUT_TIMEOUT)
    }

    fn first_endpoint(&self) -> Result<Endpoint, Error> {
        self.endpoints
            .first()
            .cloned()
            .ok_or_else(|| Error::InvalidArgument("no endpoint configured".into()))
    }

    /// Shard for docid-addressed operations, queries and mutations.
    async fn checkout_first(&self) -> Result<Guard, Error> {
        let endpoint = self.first_endpoint()?;
        Ok(self.pool.checkout(&endpoint, &self.request()).await?)
    }

    /// Every configured shard, for aggregate operations.
    async fn checkout_all(&self) -> Result<Vec<Guard>, Error> {
        if self.endpoints.is_empty() {
            return Err(Error::InvalidArgument("no endpoint configured".into()));
        }
        Ok(self
            .pool
            .checkout_many(&self.endpoints, &self.request())
            .await?)
    }

    // Access configuration.

    async fn msg_readaccess(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (create_or_open, endpoints) = parse_access(payload)?;
        self.flags = Flags {
            writable: false,
            create_or_open,
        };
        self.endpoints = endpoints;
        debug!("read access to [{}]", self.endpoints);
        self.reply_update().await
    }

    async fn msg_writeaccess(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (create_or_open, endpoints) = parse_access(payload)?;
        if endpoints.len() > 1 {
            return Err(Error::InvalidArgument(
                "only one endpoint allowed on writable connections".into(),
            ));
        }
        self.flags = Flags {
            writable: true,
            create_or_open,
        };
        self.endpoints = endpoints;
        debug!("write access to [{}]", self.endpoints);
        self.reply_update().await
    }

    /// `Update` reply: `[major, minor]`, then the aggregate stats of
    /// the configured endpoints when there are any.
    async fn reply_update(&mut self) -> Result<(), Error> {
        let mut payload = vec![PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION];

        if !self.endpoints.is_empty() {
            let guards = self.checkout_all().await?;

            let mut doccount = 0u64;
            let mut lastdocid = 0u64;
            let mut lower = u64::MAX;
            let mut upper = 0u64;
            let mut has_positions = false;
            let mut total_length = 0u64;
            let mut uuids = Vec::new();

            for guard in &guards {
                let stats = guard.update_stats();
                doccount += stats.doccount;
                lastdocid += stats.lastdocid;
                if stats.doccount > 0 {
                    lower = lower.min(stats.doclength_lower_bound);
                }
                upper = upper.max(stats.doclength_upper_bound);
                has_positions |= stats.has_positions;
                total_length += stats.total_length;
                uuids.push(stats.uuid);
            }
            if lower == u64::MAX {
                lower = 0;
            }

            serialise_length(&mut payload, doccount);
            serialise_length(&mut payload, lastdocid - doccount);
            serialise_length(&mut payload, lower);
            serialise_length(&mut payload, upper - lower);
            payload.push(if has_positions { b'1' } else { b'0' });
            serialise_length(&mut payload, total_length);
            payload.extend_from_slice(uuids.join(";").as_bytes());
        }

        self.send(RemoteReply::Update, payload).await
    }

    async fn msg_reopen(&mut self) -> Result<(), Error> {
        let advanced = {
            let guard = self.checkout_first().await?;
            guard.reopen()?
        };
        if advanced {
            self.reply_update().await
        } else {
            self.send_done().await
        }
    }

    // Term statistics.

    async fn msg_termexists(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let guards = self.checkout_all().await?;
        let exists = guards
            .iter()
            .any(|guard| guard.with_index(|index| index.term_exists(&term)));
        let reply = if exists {
            RemoteReply::TermExists
        } else {
            RemoteReply::TermDoesntExist
        };
        self.send(reply, vec![]).await
    }

    async fn msg_termfreq(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let freq = self.sum_over_shards(|index| index.termfreq(&term)).await?;
        self.send(RemoteReply::TermFreq, varint(freq)).await
    }

    async fn msg_collfreq(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let freq = self.sum_over_shards(|index| index.collfreq(&term)).await?;
        self.send(RemoteReply::CollFreq, varint(freq)).await
    }

    async fn msg_freqs(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let guards = self.checkout_all().await?;
        let mut termfreq = 0;
        let mut collfreq = 0;
        for guard in &guards {
            guard.with_index(|index| {
                termfreq += index.termfreq(&term);
                collfreq += index.collfreq(&term);
            });
        }
        let mut payload = varint(termfreq);
        serialise_length(&mut payload, collfreq);
        self.send(RemoteReply::Freqs, payload).await
    }

    async fn msg_valuestats(&mut self, payload: &[u8]) -> Result<(), Error> {
        let guards = self.checkout_all().await?;
        let p = &mut &payload[..];

        while !p.is_empty() {
            let slot = unserialise_length(p, false)?;

            let mut freq = 0u64;
            let mut lower: Option<Vec<u8>> = None;
            let mut upper: Option<Vec<u8>> = None;
            for guard in &guards {
                guard.with_index(|index| {
                    let shard_freq = index.value_freq(slot);
                    if shard_freq > 0 {
                        freq += shard_freq;
                        let shard_lower = index.value_lower_bound(slot);
                        let shard_upper = index.value_upper_bound(slot);
                        lower = Some(match lower.take() {
                            Some(current) => current.min(shard_lower),
                            None => shard_lower,
                        });
                        upper = Some(match upper.take() {
                            Some(current) => current.max(shard_upper),
                            None => shard_upper,
                        });
                    }
                });
            }

            let mut reply = varint(freq);
            serialise_string(&mut reply, &lower.unwrap_or_default());
            serialise_string(&mut reply, &upper.unwrap_or_default());
            self.send(RemoteReply::ValueStats, reply).await?;
        }

        Ok(())
    }

    async fn msg_doclength(&mut self, payload: &[u8]) -> Result<(), Error> {
        let docid = parse_docid(payload)?;
        let guard = self.checkout_first().await?;
        let doclength = guard.with_index(|index| index.doclength(docid))?;
        self.send(RemoteReply::DocLength, varint(doclength)).await
    }

    async fn msg_uniqueterms(&mut self, payload: &[u8]) -> Result<(), Error> {
        let docid = parse_docid(payload)?;
        let guard = self.checkout_first().await?;
        let unique = guard.with_index(|index| index.unique_terms(docid))?;
        self.send(RemoteReply::UniqueTerms, varint(unique)).await
    }

    // Prefix-compressed streams.

    async fn msg_allterms(&mut self, payload: &[u8]) -> Result<(), Error> {
        let prefix = utf8(payload)?;
        let guards = self.checkout_all().await?;

        // Merge sorted term streams across shards.
        let mut merged: BTreeMap<String, u64> = BTreeMap::new();
        for guard in &guards {
            guard.with_index(|index| {
                for (term, freq) in index.all_terms(&prefix) {
                    *merged.entry(term).or_default() += freq;
                }
            });
        }

        let mut prev = payload.to_vec();
        for (term, freq) in merged {
            let term = term.into_bytes();
            prev.truncate(MAX_PREFIX_REUSE);
            let reuse = common_prefix(&prev, &term).min(MAX_PREFIX_REUSE);

            let mut reply = varint(freq);
            reply.push(reuse as u8);
            reply.extend_from_slice(&term[reuse..]);
            self.send(RemoteReply::AllTerms, reply).await?;

            prev = term;
        }

        self.send_done().await
    }

    async fn msg_termlist(&mut self, payload: &[u8]) -> Result<(), Error> {
        let docid = parse_docid(payload)?;
        let guard = self.checkout_first().await?;

        let (doclength, termlist) = guard.with_index(|index| {
            let doclength = index.doclength(docid)?;
            let termlist = index.termlist(docid)?;
            Ok::<_, crate::engine::Error>((doclength, termlist))
        })?;

        self.send(RemoteReply::DocLength, varint(doclength)).await?;

        let mut prev: Vec<u8> = vec![];
        for (term, wdf, termfreq) in termlist {
            let term = term.into_bytes();
            prev.truncate(MAX_PREFIX_REUSE);
            let reuse = common_prefix(&prev, &term).min(MAX_PREFIX_REUSE);

            let mut reply = varint(wdf);
            serialise_length(&mut reply, termfreq);
            reply.push(reuse as u8);
            reply.extend_from_slice(&term[reuse..]);
            self.send(RemoteReply::TermList, reply).await?;

            prev = term;
        }

        self.send_done().await
    }

    async fn msg_metadatakeylist(&mut self, payload: &[u8]) -> Result<(), Error> {
        let prefix = utf8(payload)?;
        let guards = self.checkout_all().await?;

        let mut merged = std::collections::BTreeSet::new();
        for guard in &guards {
            guard.with_index(|index| merged.extend(index.metadata_keys(&prefix)));
        }

        let mut prev = payload.to_vec();
        for key in merged {
            let key = key.into_bytes();
            prev.truncate(MAX_PREFIX_REUSE);
            let reuse = common_prefix(&prev, &key).min(MAX_PREFIX_REUSE);

            let mut reply = vec![reuse as u8];
            reply.extend_from_slice(&key[reuse..]);
            self.send(RemoteReply::MetadataKeyList, reply).await?;

            prev = key;
        }

        self.send_done().await
    }

    async fn msg_positionlist(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let docid = unserialise_length(p, false)?;
        let term = utf8(*p)?;

        let guard = self.checkout_first().await?;
        let positions = guard.with_index(|index| index.positionlist(docid, &term))?;

        // Delta encoded: first absolute, then gap minus one.
        let mut last = None;
        for position in positions {
            let delta = match last {
                None => position,
                Some(last) => position - last - 1,
            };
            self.send(RemoteReply::PositionList, varint(delta)).await?;
            last = Some(position);
        }

        self.send_done().await
    }

    async fn msg_positionlistcount(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let docid = unserialise_length(p, false)?;
        let term = utf8(*p)?;

        let guard = self.checkout_first().await?;
        let count = guard.with_index(|index| index.positionlist_count(docid, &term))?;
        self.send(RemoteReply::PositionListCount, varint(count)).await
    }

    async fn msg_postlist(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let guard = self.checkout_first().await?;

        let (termfreq, collfreq, postings) = guard.with_index(|index| {
            (
                index.termfreq(&term),
                index.collfreq(&term),
                index.postlist(&term),
            )
        });

        let mut start = varint(termfreq);
        serialise_length(&mut start, collfreq);
        self.send(RemoteReply::PostListStart, start).await?;

        let mut last = 0;
        for (docid, wdf) in postings {
            // Docids start at one, so the first delta is docid - 1.
            let mut item = varint(docid - last - 1);
            serialise_length(&mut item, wdf);
            self.send(RemoteReply::PostListItem, item).await?;
            last = docid;
        }

        self.send_done().await
    }

    // Documents.

    async fn msg_document(&mut self, payload: &[u8]) -> Result<(), Error> {
        let docid = parse_docid(payload)?;
        let guard = self.checkout_first().await?;
        let document = guard.get_document(docid)?;

        self.send(RemoteReply::DocData, document.data.clone()).await?;

        for (slot, value) in &document.values {
            let mut reply = varint(*slot);
            reply.extend_from_slice(value);
            self.send(RemoteReply::Value, reply).await?;
        }

        self.send_done().await
    }

    async fn msg_adddocument(&mut self, payload: &[u8]) -> Result<(), Error> {
        let document = Document::unserialise(payload)?;
        let guard = self.checkout_first().await?;
        let docid = guard.add_document(document)?;
        self.send(RemoteReply::AddDocument, varint(docid)).await
    }

    async fn msg_deletedocument(&mut self, payload: &[u8]) -> Result<(), Error> {
        let docid = parse_docid(payload)?;
        let guard = self.checkout_first().await?;
        guard.delete_document(docid)?;
        self.send_done().await
    }

    /// Silent variant: no reply at all.
    async fn msg_deletedocumentterm(&mut self, payload: &[u8]) -> Result<(), Error> {
        let term = utf8(payload)?;
        let guard = self.checkout_first().await?;
        guard.delete_document_term(&term)?;
        Ok(())
    }

    /// Silent variant: no reply at all.
    async fn msg_replacedocument(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let docid = unserialise_length(p, false)?;
        let document = Document::unserialise(*p)?;
        let guard = self.checkout_first().await?;
        guard.replace_document(docid, document)?;
        Ok(())
    }

    async fn msg_replacedocumentterm(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let term = utf8(unserialise_string(p)?)?;
        let document = Document::unserialise(*p)?;
        let guard = self.checkout_first().await?;
        let docid = guard.replace_document_term(&term, document)?;
        self.send(RemoteReply::AddDocument, varint(docid)).await
    }

    async fn msg_commit(&mut self) -> Result<(), Error> {
        let guard = self.checkout_first().await?;
        guard.commit()?;
        self.send_done().await
    }

    async fn msg_cancel(&mut self) -> Result<(), Error> {
        let guard = self.checkout_first().await?;
        guard.cancel()?;
        self.send_done().await
    }

    // Metadata and spellings.

    async fn msg_getmetadata(&mut self, payload: &[u8]) -> Result<(), Error> {
        let key = utf8(payload)?;
        let guard = self.checkout_first().await?;
        let value = guard.get_metadata(&key);
        self.send(RemoteReply::Metadata, value).await
    }

    /// No reply.
    async fn msg_setmetadata(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let key = utf8(unserialise_string(p)?)?;
        let guard = self.checkout_first().await?;
        guard.set_metadata(&key, *p)?;
        Ok(())
    }

    /// No reply.
    async fn msg_addspelling(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let freq = unserialise_length(p, false)?;
        let term = utf8(*p)?;
        let guard = self.checkout_first().await?;
        guard.add_spelling(&term, freq)?;
        Ok(())
    }

    async fn msg_removespelling(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let freq = unserialise_length(p, false)?;
        let term = utf8(*p)?;
        let guard = self.checkout_first().await?;
        let removed = guard.remove_spelling(&term, freq)?;
        self.send(RemoteReply::RemoveSpelling, varint(removed)).await
    }

    async fn msg_keepalive(&mut self) -> Result<(), Error> {
        let guards = self.checkout_all().await?;
        for guard in &guards {
            guard.keep_alive();
        }
        self.send_done().await
    }

    // Queries.

    async fn msg_query(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];

        let query = Query::unserialise(unserialise_string(p)?)?;

        // Delta-encoded relevance set.
        let mut rset = vec![];
        {
            let mut rset_slice = unserialise_string(p)?;
            let rset_buf = &mut rset_slice;
            let mut last = 0;
            while !rset_buf.is_empty() {
                last += unserialise_length(rset_buf, false)?;
                rset.push(last);
            }
        }

        let weighting_name = utf8(unserialise_string(p)?)?;
        let weighting_params = unserialise_string(p)?.to_vec();
        // Unknown schemes fail before anything is stored.
        self.registry.weighting(&weighting_name, &weighting_params)?;

        let mut spies = vec![];
        while !p.is_empty() {
            let name = utf8(unserialise_string(p)?)?;
            let params = unserialise_string(p)?;
            spies.push(self.registry.spy(&name, params)?);
        }

        let guard = self.checkout_first().await?;

        let mut enquire = Enquire::new(query);
        enquire.rset = rset;
        enquire.weighting_name = weighting_name;
        enquire.weighting_params = weighting_params;
        enquire.spies = spies;

        let stats = guard.with_index(|index| enquire.prepare_stats(index));
        self.query = Some(PreparedQuery { enquire, guard });

        self.send(RemoteReply::Stats, stats.serialise()).await
    }

    async fn msg_getmset(&mut self, payload: &[u8]) -> Result<(), Error> {
        let prepared = self
            .query
            .take()
            .ok_or_else(|| Error::InvalidArgument("unexpected GetMset".into()))?;

        let p = &mut &payload[..];
        let first = unserialise_length(p, false)?;
        let maxitems = unserialise_length(p, false)?;
        let check_at_least = unserialise_length(p, false)?;
        // Stats come back verbatim, possibly merged across shards.
        let stats = MatchStats::unserialise(*p)?;

        let PreparedQuery { mut enquire, guard } = prepared;
        let mset = guard.with_index(|index| {
            enquire.get_mset(index, &self.registry, &stats, first, maxitems, check_at_least)
        })?;

        let mut payload = vec![];
        for spy in &enquire.spies {
            serialise_string(&mut payload, &spy.serialise_results());
        }
        payload.extend_from_slice(&mset.serialise());

        self.send(RemoteReply::Results, payload).await
    }
}

fn parse_access(payload: &[u8]) -> Result<(bool, Endpoints), Error> {
    let p = &mut &payload[..];
    let mut create_or_open = false;
    let mut endpoints = Endpoints::new();

    if !p.is_empty() {
        let flags = unserialise_length(p, false)?;
        create_or_open = flags & 1 != 0;

        while !p.is_empty() {
            let uri = unserialise_string(p)?;
            let uri = std::str::from_utf8(uri)
                .map_err(|_| Error::InvalidArgument("endpoint uri is not utf-8".into()))?;
            endpoints.add(Endpoint::parse(uri)?);
        }
    }

    Ok((create_or_open, endpoints))
}

fn parse_docid(payload: &[u8]) -> Result<u64, Error> {
    let p = &mut &payload[..];
    Ok(unserialise_length(p, false)?)
}

fn utf8(bytes: &[u8]) -> Result<String, Error> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Error::InvalidArgument("payload is not utf-8".into()))
}

fn varint(value: u64) -> Vec<u8> {
    let mut buf = vec![];
    serialise_length(&mut buf, value);
    buf
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl RemoteProtocol {
    async fn sum_over_shards<F>(&self, f: F) -> Result<u64, Error>
    where
        F: Fn(&crate::engine::Index) -> u64,
    {
        let guards = self.checkout_all().await?;
        Ok(guards.iter().map(|guard| guard.with_index(&f)).sum())
    }
}
