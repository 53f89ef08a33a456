//! Queries, weighting and match sets.
//!
//! Queries are serialisable trees evaluated against one shard. Match
//! statistics travel separately so a coordinator can merge stats from
//! every shard before any shard materializes its match set; the two
//! protocol round trips (`QUERY` then `GETMSET`) map onto
//! [`Enquire::prepare_stats`] and [`Enquire::get_mset`].

use std::collections::{BTreeMap, HashMap};

use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};

use super::document::{DocId, Document};
use super::index::Index;
use super::Error;

/// A serialisable query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    MatchNothing,
    Term(String),
    And(Vec<Query>),
    Or(Vec<Query>),
    /// Matches the left side with the right side excluded.
    AndNot(Box<Query>, Box<Query>),
    /// Matches the left side restricted to the right, weights from
    /// the left only.
    Filter(Box<Query>, Box<Query>),
}

impl Query {
    pub fn term(term: impl ToString) -> Self {
        Query::Term(term.to_string())
    }

    /// Every term mentioned anywhere in the tree.
    pub fn terms(&self) -> Vec<&str> {
        let mut terms = vec![];
        self.collect_terms(&mut terms);
        terms.sort_unstable();
        terms.dedup();
        terms
    }

    fn collect_terms<'a>(&'a self, terms: &mut Vec<&'a str>) {
        match self {
            Query::MatchAll | Query::MatchNothing => {}
            Query::Term(term) => terms.push(term),
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    child.collect_terms(terms);
                }
            }
            Query::AndNot(left, right) | Query::Filter(left, right) => {
                left.collect_terms(terms);
                right.collect_terms(terms);
            }
        }
    }

    pub fn serialise(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.serialise_into(&mut buf);
        buf
    }

    fn serialise_into(&self, buf: &mut Vec<u8>) {
        match self {
            Query::MatchAll => buf.push(0),
            Query::MatchNothing => buf.push(1),
            Query::Term(term) => {
                buf.push(2);
                serialise_string(buf, term.as_bytes());
            }
            Query::And(children) => {
                buf.push(3);
                serialise_length(buf, children.len() as u64);
                for child in children {
                    child.serialise_into(buf);
                }
            }
            Query::Or(children) => {
                buf.push(4);
                serialise_length(buf, children.len() as u64);
                for child in children {
                    child.serialise_into(buf);
                }
            }
            Query::AndNot(left, right) => {
                buf.push(5);
                left.serialise_into(buf);
                right.serialise_into(buf);
            }
            Query::Filter(left, right) => {
                buf.push(6);
                left.serialise_into(buf);
                right.serialise_into(buf);
            }
        }
    }

    pub fn unserialise(buf: &[u8]) -> Result<Self, Error> {
        let p = &mut &buf[..];
        let query = Self::unserialise_from(p, 0)?;
        if !p.is_empty() {
            return Err(Error::Corrupt("trailing bytes after query"));
        }
        Ok(query)
    }

    fn unserialise_from(p: &mut &[u8], depth: usize) -> Result<Self, Error> {
        if depth > 64 {
            return Err(Error::Corrupt("query nested too deeply"));
        }

        let (&tag, rest) = p.split_first().ok_or(Error::Corrupt("truncated query"))?;
        *p = rest;

        Ok(match tag {
            0 => Query::MatchAll,
            1 => Query::MatchNothing,
            2 => Query::Term(
                String::from_utf8(unserialise_string(p)?.to_vec())
                    .map_err(|_| Error::Corrupt("query term is not utf-8"))?,
            ),
            3 | 4 => {
                let count = unserialise_length(p, false)?;
                let mut children = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    children.push(Self::unserialise_from(p, depth + 1)?);
                }
                if tag == 3 {
                    Query::And(children)
                } else {
                    Query::Or(children)
                }
            }
            5 | 6 => {
                let left = Box::new(Self::unserialise_from(p, depth + 1)?);
                let right = Box::new(Self::unserialise_from(p, depth + 1)?);
                if tag == 5 {
                    Query::AndNot(left, right)
                } else {
                    Query::Filter(left, right)
                }
            }
            _ => return Err(Error::Corrupt("unknown query operator")),
        })
    }
}

/// Match statistics for one or more shards. A coordinator merges the
/// per-shard stats, then hands the merged stats back for weighting so
/// every shard scores against the same corpus-wide numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub doccount: u64,
    pub total_length: u64,
    /// term -> (termfreq, collfreq).
    pub termfreqs: BTreeMap<String, (u64, u64)>,
    pub rset_size: u64,
}

impl MatchStats {
    pub fn avg_length(&self) -> f64 {
        if self.doccount == 0 {
            0.0
        } else {
            self.total_length as f64 / self.doccount as f64
        }
    }

    pub fn termfreq(&self, term: &str) -> u64 {
        self.termfreqs.get(term).map(|&(tf, _)| tf).unwrap_or(0)
    }

    /// Accumulate another shard's stats.
    pub fn merge(&mut self, other: &MatchStats) {
        self.doccount += other.doccount;
        self.total_length += other.total_length;
        self.rset_size += other.rset_size;
        for (term, &(tf, cf)) in &other.termfreqs {
            let entry = self.termfreqs.entry(term.clone()).or_default();
            entry.0 += tf;
            entry.1 += cf;
        }
    }

    pub fn serialise(&self) -> Vec<u8> {
        let mut buf = vec![];
        serialise_length(&mut buf, self.doccount);
        serialise_length(&mut buf, self.total_length);
        serialise_length(&mut buf, self.rset_size);
        serialise_length(&mut buf, self.termfreqs.len() as u64);
        for (term, &(tf, cf)) in &self.termfreqs {
            serialise_string(&mut buf, term.as_bytes());
            serialise_length(&mut buf, tf);
            serialise_length(&mut buf, cf);
        }
        buf
    }

    pub fn unserialise(buf: &[u8]) -> Result<Self, Error> {
        let p = &mut &buf[..];
        let doccount = unserialise_length(p, false)?;
        let total_length = unserialise_length(p, false)?;
        let rset_size = unserialise_length(p, false)?;
        let count = unserialise_length(p, false)?;

        let mut termfreqs = BTreeMap::new();
        for _ in 0..count {
            let term = String::from_utf8(unserialise_string(p)?.to_vec())
                .map_err(|_| Error::Corrupt("stats term is not utf-8"))?;
            let tf = unserialise_length(p, false)?;
            let cf = unserialise_length(p, false)?;
            termfreqs.insert(term, (tf, cf));
        }

        Ok(Self {
            doccount,
            total_length,
            termfreqs,
            rset_size,
        })
    }
}

/// A weighting scheme instance.
pub trait Weighting: Send {
    fn weight(&self, stats: &MatchStats, wdf: u64, doclength: u64, term: &str) -> f64;
}

/// Classic BM25.
pub struct Bm25Weighting {
    k1: f64,
    b: f64,
}

impl Default for Bm25Weighting {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Weighting {
    fn unserialise(params: &[u8]) -> Result<Box<dyn Weighting>, Error> {
        if params.is_empty() {
            return Ok(Box::new(Self::default()));
        }
        if params.len() != 16 {
            return Err(Error::Corrupt("bad bm25 parameters"));
        }
        let k1 = f64::from_le_bytes(params[0..8].try_into().unwrap());
        let b = f64::from_le_bytes(params[8..16].try_into().unwrap());
        Ok(Box::new(Self { k1, b }))
    }
}

impl Weighting for Bm25Weighting {
    fn weight(&self, stats: &MatchStats, wdf: u64, doclength: u64, term: &str) -> f64 {
        let n = stats.doccount.max(1) as f64;
        let termfreq = stats.termfreq(term).max(1) as f64;
        let idf = ((n - termfreq + 0.5) / (termfreq + 0.5) + 1.0).ln();

        let avg = stats.avg_length().max(1.0);
        let wdf = wdf as f64;
        let norm = self.k1 * (1.0 - self.b + self.b * doclength as f64 / avg);

        idf * (wdf * (self.k1 + 1.0)) / (wdf + norm)
    }
}

/// Boolean retrieval: every match weighs nothing.
pub struct BoolWeighting;

impl BoolWeighting {
    fn unserialise(_params: &[u8]) -> Result<Box<dyn Weighting>, Error> {
        Ok(Box::new(Self))
    }
}

impl Weighting for BoolWeighting {
    fn weight(&self, _stats: &MatchStats, _wdf: u64, _doclength: u64, _term: &str) -> f64 {
        0.0
    }
}

/// A match spy collects facts about every examined document.
pub trait MatchSpy: Send + Sync {
    fn collect(&mut self, document: &Document, weight: f64);
    fn serialise_results(&self) -> Vec<u8>;
}

/// Counts distinct values in one slot across examined documents.
pub struct ValueCountSpy {
    slot: u64,
    counts: BTreeMap<Vec<u8>, u64>,
}

impl ValueCountSpy {
    fn unserialise(params: &[u8]) -> Result<Box<dyn MatchSpy>, Error> {
        let p = &mut &params[..];
        let slot = unserialise_length(p, false)?;
        Ok(Box::new(Self {
            slot,
            counts: BTreeMap::new(),
        }))
    }

    /// Decode results serialised by [`MatchSpy::serialise_results`].
    pub fn parse_results(buf: &[u8]) -> Result<BTreeMap<Vec<u8>, u64>, Error> {
        let p = &mut &buf[..];
        let count = unserialise_length(p, false)?;
        let mut counts = BTreeMap::new();
        for _ in 0..count {
            let value = unserialise_string(p)?.to_vec();
            let freq = unserialise_length(p, false)?;
            counts.insert(value, freq);
        }
        Ok(counts)
    }
}

impl MatchSpy for ValueCountSpy {
    fn collect(&mut self, document: &Document, _weight: f64) {
        if let Some(value) = document.values.get(&self.slot) {
            *self.counts.entry(value.clone()).or_default() += 1;
        }
    }

    fn serialise_results(&self) -> Vec<u8> {
        let mut buf = vec![];
        serialise_length(&mut buf, self.counts.len() as u64);
        for (value, freq) in &self.counts {
            serialise_string(&mut buf, value);
            serialise_length(&mut buf, *freq);
        }
        buf
    }
}

type WeightingCtor = fn(&[u8]) -> Result<Box<dyn Weighting>, Error>;
type SpyCtor = fn(&[u8]) -> Result<Box<dyn MatchSpy>, Error>;

/// Per-connection registry of weighting schemes and match spies,
/// looked up by name.
pub struct Registry {
    weightings: HashMap<&'static str, WeightingCtor>,
    spies: HashMap<&'static str, SpyCtor>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self {
            weightings: HashMap::new(),
            spies: HashMap::new(),
        };
        registry.weightings.insert("bm25", Bm25Weighting::unserialise);
        registry.weightings.insert("bool", BoolWeighting::unserialise);
        registry.spies.insert("valuecount", ValueCountSpy::unserialise);
        registry
    }
}

impl Registry {
    pub fn weighting(&self, name: &str, params: &[u8]) -> Result<Box<dyn Weighting>, Error> {
        match self.weightings.get(name) {
            Some(ctor) => ctor(params),
            None => Err(Error::UnknownWeighting(name.to_owned())),
        }
    }

    pub fn spy(&self, name: &str, params: &[u8]) -> Result<Box<dyn MatchSpy>, Error> {
        match self.spies.get(name) {
            Some(ctor) => ctor(params),
            None => Err(Error::UnknownSpy(name.to_owned())),
        }
    }
}

/// One match.
#[derive(Debug, Clone, PartialEq)]
pub struct MSetItem {
    pub docid: DocId,
    pub weight: f64,
}

/// A materialized set of matches with bounds metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MSet {
    pub first: u64,
    pub matches_lower_bound: u64,
    pub matches_estimated: u64,
    pub matches_upper_bound: u64,
    pub max_possible: f64,
    pub max_attained: f64,
    pub items: Vec<MSetItem>,
}

impl MSet {
    pub fn serialise(&self) -> Vec<u8> {
        let mut buf = vec![];
        serialise_length(&mut buf, self.first);
        serialise_length(&mut buf, self.matches_lower_bound);
        serialise_length(&mut buf, self.matches_estimated);
        serialise_length(&mut buf, self.matches_upper_bound);
        buf.extend_from_slice(&self.max_possible.to_le_bytes());
        buf.extend_from_slice(&self.max_attained.to_le_bytes());
        serialise_length(&mut buf, self.items.len() as u64);
        for item in &self.items {
            serialise_length(&mut buf, item.docid);
            buf.extend_from_slice(&item.weight.to_le_bytes());
        }
        buf
    }

    pub fn unserialise(buf: &[u8]) -> Result<Self, Error> {
        let p = &mut &buf[..];
        let first = unserialise_length(p, false)?;
        let matches_lower_bound = unserialise_length(p, false)?;
        let matches_estimated = unserialise_length(p, false)?;
        let matches_upper_bound = unserialise_length(p, false)?;
        let max_possible = take_f64(p)?;
        let max_attained = take_f64(p)?;

        let count = unserialise_length(p, false)?;
        let mut items = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let docid = unserialise_length(p, false)?;
            let weight = take_f64(p)?;
            items.push(MSetItem { docid, weight });
        }

        Ok(Self {
            first,
            matches_lower_bound,
            matches_estimated,
            matches_upper_bound,
            max_possible,
            max_attained,
            items,
        })
    }
}

fn take_f64(p: &mut &[u8]) -> Result<f64, Error> {
    if p.len() < 8 {
        return Err(Error::Corrupt("truncated double"));
    }
    let (bytes, rest) = p.split_at(8);
    *p = rest;
    Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
}

/// A prepared query: stats first, match set on the second round trip.
pub struct Enquire {
    pub query: Query,
    pub rset: Vec<DocId>,
    pub weighting_name: String,
    pub weighting_params: Vec<u8>,
    pub spies: Vec<Box<dyn MatchSpy>>,
}

impl Enquire {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            rset: vec![],
            weighting_name: "bm25".into(),
            weighting_params: vec![],
            spies: vec![],
        }
    }

    /// Local match statistics for this shard: the first round trip.
    pub fn prepare_stats(&self, index: &Index) -> MatchStats {
        let mut stats = MatchStats {
            doccount: index.doccount(),
            total_length: index.total_length(),
            rset_size: self.rset.len() as u64,
            ..Default::default()
        };
        for term in self.query.terms() {
            stats
                .termfreqs
                .insert(term.to_owned(), (index.termfreq(term), index.collfreq(term)));
        }
        stats
    }

    /// Materialize the match set using (possibly merged) statistics.
    pub fn get_mset(
        &mut self,
        index: &Index,
        registry: &Registry,
        stats: &MatchStats,
        first: u64,
        maxitems: u64,
        check_at_least: u64,
    ) -> Result<MSet, Error> {
        let weighting = registry.weighting(&self.weighting_name, &self.weighting_params)?;

        let mut matches = execute(&self.query, index, stats, weighting.as_ref())?;
        matches.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let checked = matches
            .len()
            .min((first + maxitems).max(check_at_least) as usize);
        for &(docid, weight) in &matches[..checked] {
            if let Ok(document) = index.document(docid) {
                for spy in &mut self.spies {
                    spy.collect(document, weight);
                }
            }
        }

        let max_attained = matches.first().map(|&(_, w)| w).unwrap_or(0.0);
        let total = matches.len() as u64;
        let items = matches
            .into_iter()
            .skip(first as usize)
            .take(maxitems as usize)
            .map(|(docid, weight)| MSetItem { docid, weight })
            .collect();

        Ok(MSet {
            first,
            matches_lower_bound: total,
            matches_estimated: total,
            matches_upper_bound: total,
            max_possible: max_attained,
            max_attained,
            items,
        })
    }
}

fn execute(
    query: &Query,
    index: &Index,
    stats: &MatchStats,
    weighting: &dyn Weighting,
) -> Result<Vec<(DocId, f64)>, Error> {
    Ok(match query {
        Query::MatchNothing => vec![],
        Query::MatchAll => {
            let mut all: Vec<_> = (1..=index.lastdocid())
                .filter(|&docid| index.document(docid).is_ok())
                .map(|docid| (docid, 0.0))
                .collect();
            all.sort_by_key(|&(docid, _)| docid);
            all
        }
        Query::Term(term) => index
            .postlist(term)
            .into_iter()
            .map(|(docid, wdf)| {
                let doclength = index.doclength(docid).unwrap_or(0);
                (docid, weighting.weight(stats, wdf, doclength, term))
            })
            .collect(),
        Query::Or(children) => {
            let mut merged: BTreeMap<DocId, f64> = BTreeMap::new();
            for child in children {
                for (docid, weight) in execute(child, index, stats, weighting)? {
                    *merged.entry(docid).or_default() += weight;
                }
            }
            merged.into_iter().collect()
        }
        Query::And(children) => {
            let mut iter = children.iter();
            let mut merged: BTreeMap<DocId, f64> = match iter.next() {
                Some(child) => execute(child, index, stats, weighting)?.into_iter().collect(),
                None => return Ok(vec![]),
            };
            for child in iter {
                let next: BTreeMap<DocId, f64> =
                    execute(child, index, stats, weighting)?.into_iter().collect();
                merged = merged
                    .into_iter()
                    .filter_map(|(docid, weight)| {
                        next.get(&docid).map(|more| (docid, weight + more))
                    })
                    .collect();
            }
            merged.into_iter().collect()
        }
        Query::AndNot(left, right) => {
            let excluded: BTreeMap<DocId, f64> =
                execute(right, index, stats, weighting)?.into_iter().collect();
            execute(left, index, stats, weighting)?
                .into_iter()
                .filter(|(docid, _)| !excluded.contains_key(docid))
                .collect()
        }
        Query::Filter(left, right) => {
            let filter: BTreeMap<DocId, f64> =
                execute(right, index, stats, weighting)?.into_iter().collect();
            execute(left, index, stats, weighting)?
                .into_iter()
                .filter(|(docid, _)| filter.contains_key(docid))
                .collect()
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn index() -> Index {
        let mut index = Index::memory();
        for body in [
            "the quick brown fox",
            "the lazy dog",
            "quick quick slow",
            "unrelated entry",
        ] {
            let mut document = Document::new(body.as_bytes());
            for word in body.split_whitespace() {
                document.add_term(word, 1);
            }
            document.set_value(0, body.split_whitespace().next().unwrap().as_bytes().to_vec());
            index.add_document(document).unwrap();
        }
        index
    }

    fn mset(index: &Index, query: Query) -> MSet {
        let mut enquire = Enquire::new(query);
        let stats = enquire.prepare_stats(index);
        enquire
            .get_mset(index, &Registry::default(), &stats, 0, 10, 0)
            .unwrap()
    }

    #[test]
    fn test_query_round_trip() {
        let query = Query::Or(vec![
            Query::term("quick"),
            Query::And(vec![Query::term("lazy"), Query::term("dog")]),
            Query::AndNot(Box::new(Query::MatchAll), Box::new(Query::term("slow"))),
            Query::Filter(Box::new(Query::term("fox")), Box::new(Query::MatchNothing)),
        ]);
        assert_eq!(Query::unserialise(&query.serialise()).unwrap(), query);
    }

    #[test]
    fn test_query_terms() {
        let query = Query::And(vec![Query::term("b"), Query::term("a"), Query::term("b")]);
        assert_eq!(query.terms(), ["a", "b"]);
    }

    #[test]
    fn test_term_query_ranks_by_wdf() {
        let results = mset(&index(), Query::term("quick"));
        let docids: Vec<_> = results.items.iter().map(|item| item.docid).collect();
        // Doc 3 mentions "quick" twice and is shorter.
        assert_eq!(docids, [3, 1]);
        assert!(results.items[0].weight > results.items[1].weight);
    }

    #[test]
    fn test_and_or_not() {
        let idx = index();

        let both = mset(&idx, Query::And(vec![Query::term("lazy"), Query::term("dog")]));
        assert_eq!(both.items.len(), 1);
        assert_eq!(both.items[0].docid, 2);

        let either = mset(&idx, Query::Or(vec![Query::term("fox"), Query::term("dog")]));
        assert_eq!(either.items.len(), 2);

        let not_slow = mset(
            &idx,
            Query::AndNot(Box::new(Query::term("quick")), Box::new(Query::term("slow"))),
        );
        assert_eq!(not_slow.items.len(), 1);
        assert_eq!(not_slow.items[0].docid, 1);
    }

    #[test]
    fn test_bool_weighting() {
        let idx = index();
        let mut enquire = Enquire::new(Query::term("quick"));
        enquire.weighting_name = "bool".into();
        let stats = enquire.prepare_stats(&idx);
        let results = enquire
            .get_mset(&idx, &Registry::default(), &stats, 0, 10, 0)
            .unwrap();
        assert!(results.items.iter().all(|item| item.weight == 0.0));
        // Ties break by docid.
        let docids: Vec<_> = results.items.iter().map(|item| item.docid).collect();
        assert_eq!(docids, [1, 3]);
    }

    #[test]
    fn test_unknown_weighting() {
        let idx = index();
        let mut enquire = Enquire::new(Query::MatchAll);
        enquire.weighting_name = "pagerank".into();
        let stats = enquire.prepare_stats(&idx);
        assert!(matches!(
            enquire.get_mset(&idx, &Registry::default(), &stats, 0, 10, 0),
            Err(Error::UnknownWeighting(_))
        ));
    }

    #[test]
    fn test_pagination() {
        let idx = index();
        let page = {
            let mut enquire = Enquire::new(Query::MatchAll);
            enquire.weighting_name = "bool".into();
            let stats = enquire.prepare_stats(&idx);
            enquire
                .get_mset(&idx, &Registry::default(), &stats, 2, 10, 0)
                .unwrap()
        };
        assert_eq!(page.first, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.matches_estimated, 4);
    }

    #[test]
    fn test_value_count_spy() {
        let idx = index();
        let mut enquire = Enquire::new(Query::MatchAll);
        enquire.weighting_name = "bool".into();
        enquire.spies.push(
            Registry::default()
                .spy("valuecount", &{
                    let mut params = vec![];
                    serialise_length(&mut params, 0);
                    params
                })
                .unwrap(),
        );

        let stats = enquire.prepare_stats(&idx);
        enquire
            .get_mset(&idx, &Registry::default(), &stats, 0, 10, 0)
            .unwrap();

        let results = ValueCountSpy::parse_results(&enquire.spies[0].serialise_results()).unwrap();
        assert_eq!(results.get(&b"the"[..].to_vec()), Some(&2));
        assert_eq!(results.get(&b"quick"[..].to_vec()), Some(&1));
        assert_eq!(results.get(&b"unrelated"[..].to_vec()), Some(&1));
    }

    #[test]
    fn test_merged_stats_change_weights() {
        let idx = index();
        let mut enquire = Enquire::new(Query::term("quick"));
        let local = enquire.prepare_stats(&idx);

        // Pretend another shard holds many more documents with the
        // term: the idf drops, and so do the weights.
        let mut merged = local.clone();
        merged.merge(&MatchStats {
            doccount: 1000,
            total_length: 4000,
            termfreqs: [("quick".to_owned(), (900, 1800))].into_iter().collect(),
            rset_size: 0,
        });

        let with_local = enquire
            .get_mset(&idx, &Registry::default(), &local, 0, 10, 0)
            .unwrap();
        let with_merged = enquire
            .get_mset(&idx, &Registry::default(), &merged, 0, 10, 0)
            .unwrap();
        assert!(with_merged.items[0].weight < with_local.items[0].weight);
    }

    #[test]
    fn test_stats_round_trip() {
        let stats = MatchStats {
            doccount: 10,
            total_length: 55,
            termfreqs: [("alpha".to_owned(), (3, 7))].into_iter().collect(),
            rset_size: 2,
        };
        assert_eq!(MatchStats::unserialise(&stats.serialise()).unwrap(), stats);
    }

    #[test]
    fn test_mset_round_trip() {
        let mset = MSet {
            first: 1,
            matches_lower_bound: 5,
            matches_estimated: 5,
            matches_upper_bound: 5,
            max_possible: 2.5,
            max_attained: 2.25,
            items: vec![
                MSetItem {
                    docid: 4,
                    weight: 2.25,
                },
                MSetItem {
                    docid: 2,
                    weight: 0.5,
                },
            ],
        };
        assert_eq!(MSet::unserialise(&mset.serialise()).unwrap(), mset);
    }
}
