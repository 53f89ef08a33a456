//! End-to-end protocol tests over real sockets.

use tempfile::TempDir;

use crate::backend::endpoint::Endpoint;
use crate::backend::pool::{Config, Pool};
use crate::backend::shard::Flags;
use crate::engine::query::ValueCountSpy;
use crate::engine::{Document, Query};
use crate::net::length::{serialise_length, serialise_string};
use crate::net::{Frame, FrameStream};

use super::client::RemoteClient;
use super::listener::{Listener, Protocol};
use super::messages::{
    RemoteMessage, RemoteReply, PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION,
};
use super::replication::Replication;
use super::Error;

struct TestNode {
    pool: Pool,
    remote: String,
    replication: String,
    _root: TempDir,
}

async fn node() -> TestNode {
    let root = tempfile::tempdir().unwrap();
    let pool = Pool::new(Config {
        root: root.path().to_path_buf(),
        ..Default::default()
    });

    let (remote, _) = Listener::spawn("127.0.0.1:0", pool.clone(), Protocol::Remote)
        .await
        .unwrap();
    let (replication, _) = Listener::spawn("127.0.0.1:0", pool.clone(), Protocol::Replication)
        .await
        .unwrap();

    TestNode {
        pool,
        remote: remote.to_string(),
        replication: replication.to_string(),
        _root: root,
    }
}

fn doc(body: &str) -> Document {
    let mut document = Document::new(body.as_bytes());
    for (position, word) in body.split_whitespace().enumerate() {
        document.add_position(word, position as u64 + 1);
    }
    document
}

#[tokio::test]
async fn test_handshake_carries_protocol_version() {
    let node = node().await;
    let (_, info) = RemoteClient::connect(&node.remote).await.unwrap();

    assert_eq!(info.major, PROTOCOL_MAJOR_VERSION);
    assert_eq!(info.minor, PROTOCOL_MINOR_VERSION);
    assert_eq!(info.doccount, 0); // no endpoints configured yet
}

#[tokio::test]
async fn test_index_commit_and_stats() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();

    let info = client.write_access(true, "mail").await.unwrap();
    assert_eq!(info.doccount, 0);

    let docid = client
        .add_document(&doc("hello distributed search"))
        .await
        .unwrap();
    assert_eq!(docid, 1);
    client.add_document(&doc("hello again")).await.unwrap();
    client.commit().await.unwrap();

    let info = client.update().await.unwrap();
    assert_eq!(info.doccount, 2);
    assert_eq!(info.lastdocid, 2);
    assert!(info.has_positions);
    assert_eq!(info.total_length, 5);
    assert!(!info.uuid.is_empty());

    assert!(client.term_exists("hello").await.unwrap());
    assert!(!client.term_exists("absent").await.unwrap());
    assert_eq!(client.term_freq("hello").await.unwrap(), 2);
    assert_eq!(client.freqs("hello").await.unwrap(), (2, 2));
    assert_eq!(client.doc_length(1).await.unwrap(), 3);
    assert_eq!(client.unique_terms(1).await.unwrap(), 3);
    assert_eq!(client.position_list(1, "search").await.unwrap(), vec![3]);
    assert_eq!(client.position_list_count(1, "search").await.unwrap(), 1);

    let ((termfreq, collfreq), postings) = client.post_list("hello").await.unwrap();
    assert_eq!((termfreq, collfreq), (2, 2));
    assert_eq!(postings, vec![(1, 1), (2, 1)]);
}

#[tokio::test]
async fn test_query_two_round_trips() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();

    client.write_access(true, "library").await.unwrap();
    client.add_document(&doc("rust in action")).await.unwrap();
    client.add_document(&doc("action movies")).await.unwrap();
    client.add_document(&doc("cooking")).await.unwrap();
    client.commit().await.unwrap();

    let stats = client.query(&Query::term("action")).await.unwrap();
    assert_eq!(stats.doccount, 3);
    assert_eq!(stats.termfreq("action"), 2);

    // Stats go back verbatim; a coordinator would merge them first.
    let (_, mset) = client.get_mset(0, 10, 0, &stats).await.unwrap();
    assert_eq!(mset.items.len(), 2);
    assert!(mset.items[0].weight > 0.0);

    let docids: Vec<_> = mset.items.iter().map(|item| item.docid).collect();
    assert!(docids.contains(&1));
    assert!(docids.contains(&2));
}

#[tokio::test]
async fn test_query_with_value_count_spy() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();

    client.write_access(true, "facets").await.unwrap();
    for (body, color) in [("a", "red"), ("b", "red"), ("c", "blue")] {
        let mut document = doc(body);
        document.set_value(0, color.as_bytes().to_vec());
        client.add_document(&document).await.unwrap();
    }
    client.commit().await.unwrap();

    let mut params = vec![];
    serialise_length(&mut params, 0);
    let stats = client
        .query_full(
            &Query::MatchAll,
            "bool",
            &[],
            &[],
            &[("valuecount", params)],
        )
        .await
        .unwrap();

    let (spy_results, mset) = client.get_mset(0, 10, 0, &stats).await.unwrap();
    assert_eq!(mset.items.len(), 3);
    assert_eq!(spy_results.len(), 1);

    let counts = ValueCountSpy::parse_results(&spy_results[0]).unwrap();
    assert_eq!(counts.get(&b"red"[..].to_vec()), Some(&2));
    assert_eq!(counts.get(&b"blue"[..].to_vec()), Some(&1));
}

#[tokio::test]
async fn test_unknown_weighting_scheme_keeps_connection() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "w").await.unwrap();

    let err = client
        .query_full(&Query::MatchAll, "pagerank", &[], &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert!(err.to_string().contains("not registered"));

    // The connection keeps serving after the exception.
    assert!(!client.term_exists("anything").await.unwrap());
}

#[tokio::test]
async fn test_missing_document_is_an_exception_not_a_hangup() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "sparse").await.unwrap();

    let err = client.doc_length(42).await.unwrap_err();
    assert!(err.to_string().contains("not found"));

    client.add_document(&doc("alive")).await.unwrap();
    assert_eq!(client.doc_length(1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_document_round_trip_with_values() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "docs").await.unwrap();

    let mut document = doc("stored document");
    document.set_value(0, &b"alpha"[..]);
    document.set_value(3, &b"beta"[..]);
    let docid = client.add_document(&document).await.unwrap();

    let (data, values) = client.get_document(docid).await.unwrap();
    assert_eq!(data, b"stored document");
    assert_eq!(values.get(&0).unwrap(), b"alpha");
    assert_eq!(values.get(&3).unwrap(), b"beta");

    // Replace by unique term reuses the docid.
    let mut replacement = doc("fresh body");
    replacement.add_term("Qkey", 1);
    client.replace_document(docid, &replacement).await.unwrap();
    let replaced = client
        .replace_document_term("Qkey", &doc("fresher body"))
        .await
        .unwrap();
    assert_eq!(replaced, docid);

    client.delete_document(docid).await.unwrap();
    assert!(client.get_document(docid).await.is_err());
}

#[tokio::test]
async fn test_metadata_and_spellings() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "meta").await.unwrap();

    client.set_metadata("schema", b"v2").await.unwrap();
    client.set_metadata("schema.fields", b"3").await.unwrap();
    client.set_metadata("other", b"x").await.unwrap();

    assert_eq!(client.get_metadata("schema").await.unwrap(), b"v2");
    assert!(client.get_metadata("absent").await.unwrap().is_empty());
    assert_eq!(
        client.metadata_keys("schema").await.unwrap(),
        ["schema", "schema.fields"],
    );

    client.add_spelling("ferret", 3).await.unwrap();
    assert_eq!(client.remove_spelling("ferret", 2).await.unwrap(), 2);
    assert_eq!(client.remove_spelling("ferret", 2).await.unwrap(), 1);
}

#[tokio::test]
async fn test_all_terms_prefix_stream() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "terms").await.unwrap();

    let mut document = Document::new(&b""[..]);
    document
        .add_term("apple", 1)
        .add_term("apply", 2)
        .add_term("apricot", 1)
        .add_term("banana", 1);
    client.add_document(&document).await.unwrap();

    let terms = client.all_terms("ap").await.unwrap();
    assert_eq!(
        terms,
        vec![
            ("apple".to_owned(), 1),
            ("apply".to_owned(), 1),
            ("apricot".to_owned(), 1),
        ],
    );

    let (doclength, termlist) = client.term_list(1).await.unwrap();
    assert_eq!(doclength, 5);
    assert_eq!(termlist.len(), 4);
    assert_eq!(termlist[0], ("apple".to_owned(), 1, 1));
}

#[tokio::test]
async fn test_termlist_stream_reuse_bytes() {
    let node = node().await;

    // Raw frames: the prefix-compressed stream sends reuse bytes
    // 0, 4, 2 for apple / apply / apricot.
    let stream = tokio::net::TcpStream::connect(&node.remote).await.unwrap();
    let mut stream = FrameStream::new(stream);

    let welcome = stream.read_frame().await.unwrap();
    assert_eq!(welcome.code, u8::from(RemoteReply::Update));
    assert_eq!(welcome.payload[0], PROTOCOL_MAJOR_VERSION);
    assert_eq!(welcome.payload[1], PROTOCOL_MINOR_VERSION);

    let mut access = vec![];
    serialise_length(&mut access, 1); // create_or_open
    serialise_string(&mut access, b"fruits");
    stream
        .send_flush(&Frame::new(u8::from(RemoteMessage::WriteAccess), access))
        .await
        .unwrap();
    assert_eq!(
        stream.read_frame().await.unwrap().code,
        u8::from(RemoteReply::Update),
    );

    let mut document = Document::new(&b""[..]);
    document
        .add_term("apple", 1)
        .add_term("apply", 1)
        .add_term("apricot", 1);
    stream
        .send_flush(&Frame::new(
            u8::from(RemoteMessage::AddDocument),
            document.serialise(),
        ))
        .await
        .unwrap();
    assert_eq!(
        stream.read_frame().await.unwrap().code,
        u8::from(RemoteReply::AddDocument),
    );

    let mut termlist = vec![];
    serialise_length(&mut termlist, 1); // docid
    stream
        .send_flush(&Frame::new(u8::from(RemoteMessage::TermList), termlist))
        .await
        .unwrap();

    assert_eq!(
        stream.read_frame().await.unwrap().code,
        u8::from(RemoteReply::DocLength),
    );

    // Each entry: wdf var-int, termfreq var-int, reuse byte, suffix.
    for expected_reuse in [0u8, 4, 2] {
        let frame = stream.read_frame().await.unwrap();
        assert_eq!(frame.code, u8::from(RemoteReply::TermList));
        assert_eq!(frame.payload[2], expected_reuse);
    }
    assert_eq!(
        stream.read_frame().await.unwrap().code,
        u8::from(RemoteReply::Done),
    );
}

#[tokio::test]
async fn test_reopen_sees_other_connections_commit() {
    let node = node().await;

    let (mut writer, _) = RemoteClient::connect(&node.remote).await.unwrap();
    writer.write_access(true, "shared").await.unwrap();
    writer.commit().await.unwrap(); // shard exists on disk

    let (mut reader, _) = RemoteClient::connect(&node.remote).await.unwrap();
    let info = reader.read_access(false, &["shared"]).await.unwrap();
    assert_eq!(info.doccount, 0);
    assert!(!reader.reopen().await.unwrap());

    writer.add_document(&doc("breaking news")).await.unwrap();
    writer.commit().await.unwrap();

    assert!(reader.reopen().await.unwrap());
    let info = reader.update().await.unwrap();
    assert_eq!(info.doccount, 1);
    assert!(reader.term_exists("news").await.unwrap());
}

#[tokio::test]
async fn test_cancel_discards_uncommitted() {
    let node = node().await;
    let (mut client, _) = RemoteClient::connect(&node.remote).await.unwrap();
    client.write_access(true, "tx").await.unwrap();

    client.add_document(&doc("kept")).await.unwrap();
    client.commit().await.unwrap();

    client.add_document(&doc("doomed")).await.unwrap();
    client.cancel().await.unwrap();

    let info = client.update().await.unwrap();
    assert_eq!(info.doccount, 1);
    assert!(!client.term_exists("doomed").await.unwrap());
}

#[tokio::test]
async fn test_shutdown_closes_one_connection_only() {
    let node = node().await;

    let (mut first, _) = RemoteClient::connect(&node.remote).await.unwrap();
    first.write_access(true, "up").await.unwrap();
    first.shutdown().await.unwrap();

    // The listener still accepts new connections.
    let (mut second, _) = RemoteClient::connect(&node.remote).await.unwrap();
    second.read_access(true, &["up"]).await.unwrap();
}

#[tokio::test]
async fn test_replication_full_copy() {
    let source = node().await;
    let target = node().await;

    // Source shard at some revision with real content.
    let (mut client, _) = RemoteClient::connect(&source.remote).await.unwrap();
    client.write_access(true, "replica").await.unwrap();
    client.add_document(&doc("first commit")).await.unwrap();
    client.commit().await.unwrap();
    client.add_document(&doc("second commit")).await.unwrap();
    client.commit().await.unwrap();

    let source_info = client.update().await.unwrap();

    // Empty target requests everything.
    let endpoint = Endpoint::parse("replica").unwrap();
    let revision = Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap();
    assert_eq!(revision, 2);

    let guard = target
        .pool
        .checkout(
            &endpoint,
            &crate::backend::pool::Request::new(
                Flags::OPEN,
                std::time::Duration::from_secs(1),
            ),
        )
        .await
        .unwrap();
    assert_eq!(guard.revision(), 2);
    assert_eq!(guard.uuid(), source_info.uuid);
    assert!(guard.with_index(|index| index.term_exists("second")));
}

#[tokio::test]
async fn test_replication_incremental_changesets() {
    let source = node().await;
    let target = node().await;
    let endpoint = Endpoint::parse("rolling").unwrap();

    let (mut client, _) = RemoteClient::connect(&source.remote).await.unwrap();
    client.write_access(true, "rolling").await.unwrap();
    client.add_document(&doc("revision one")).await.unwrap();
    client.commit().await.unwrap();

    let first = Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap();
    assert_eq!(first, 1);

    // More commits on the source; the second pull rides changesets.
    client.add_document(&doc("revision two")).await.unwrap();
    client.commit().await.unwrap();
    client.add_document(&doc("revision three")).await.unwrap();
    client.commit().await.unwrap();

    let second = Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap();
    assert_eq!(second, 3);

    let guard = target
        .pool
        .checkout(
            &endpoint,
            &crate::backend::pool::Request::new(
                Flags::OPEN,
                std::time::Duration::from_secs(1),
            ),
        )
        .await
        .unwrap();
    assert_eq!(guard.revision(), 3);
    assert!(guard.with_index(|index| index.term_exists("three")));
    assert!(guard.with_index(|index| index.term_exists("one")));
}

#[tokio::test]
async fn test_replication_failure_leaves_target_untouched() {
    let source = node().await;
    let target = node().await;
    let endpoint = Endpoint::parse("missing").unwrap();

    let err = Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReplicationFailed(_)));

    // No live shard and no leftover switch-in directory.
    let root = target.pool.config().root.clone();
    assert!(!root.join("missing").exists());
    assert!(!root.join("missing.switch").exists());
}

#[tokio::test]
async fn test_replication_preserves_live_serving() {
    let source = node().await;
    let target = node().await;
    let endpoint = Endpoint::parse("served").unwrap();

    let (mut client, _) = RemoteClient::connect(&source.remote).await.unwrap();
    client.write_access(true, "served").await.unwrap();
    client.add_document(&doc("online content")).await.unwrap();
    client.commit().await.unwrap();

    Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap();

    // Query the replica through its own remote protocol.
    let (mut reader, _) = RemoteClient::connect(&target.remote).await.unwrap();
    let info = reader.read_access(false, &["served"]).await.unwrap();
    assert_eq!(info.doccount, 1);
    assert!(reader.term_exists("online").await.unwrap());

    // A second pull while the reader connection is alive: the swap
    // happens under the endpoint lock, the cached handles are dropped,
    // and the reader's next checkout opens the switched-in shard.
    client.add_document(&doc("more content")).await.unwrap();
    client.commit().await.unwrap();
    Replication::replicate(&target.pool, &source.replication, &endpoint)
        .await
        .unwrap();

    reader.reopen().await.unwrap();
    assert!(reader.term_exists("more").await.unwrap());
}
