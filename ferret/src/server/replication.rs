//! Replication protocol.
//!
//! The source streams a snapshot (when the receiver's uuid doesn't
//! match or the changeset span has a gap) followed by changeset files;
//! the receiver populates a switch-in directory next to the live shard
//! and swaps it in under the endpoint lock, so no in-flight query ever
//! observes a half-applied state. File payloads ride the transport's
//! file mode, keeping memory use independent of changeset size.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::backend::endpoint::Endpoint;
use crate::backend::pool::{Pool, Request};
use crate::backend::shard::Flags;
use crate::engine::index::WAL_DIR;
use crate::engine::Index;
use crate::net::length::{serialise_length, serialise_string, unserialise_length, unserialise_string};
use crate::net::{Frame, FrameStream};

use super::error::Error;
use super::messages::{
    ReplicaState, ReplicationMessage, ReplicationReply, PROTOCOL_MAJOR_VERSION,
    PROTOCOL_MINOR_VERSION,
};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(60);
const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Server half: answers `GetChangesets`.
pub struct ReplicationProtocol {
    pool: Pool,
    stream: FrameStream,
    state: ReplicaState,
}

impl ReplicationProtocol {
    pub fn new(pool: Pool, stream: FrameStream) -> Self {
        Self {
            pool,
            stream,
            state: ReplicaState::InitReplicationServer,
        }
    }

    /// Accept-loop entry point.
    pub async fn handle(pool: Pool, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let protocol = Self::new(pool, FrameStream::new(stream));
        match protocol.run().await {
            Ok(()) => trace!("replication client disconnected {:?}", peer),
            Err(err) => error!("replication client crashed {:?}: {}", peer, err),
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        debug_assert_eq!(self.state, ReplicaState::InitReplicationServer);

        self.stream
            .send_flush(&Frame::new(
                u8::from(ReplicationReply::Welcome),
                vec![PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION],
            ))
            .await
            .map_err(Error::Net)?;
        self.state = ReplicaState::ReplicationServer;

        loop {
            let frame = match self.stream.read_frame().await {
                Ok(frame) => frame,
                Err(crate::net::Error::Eof) => return Ok(()),
                Err(err) => return Err(err.into()),
            };

            match ReplicationMessage::try_from(frame.code)? {
                ReplicationMessage::GetChangesets => {
                    if let Err(err) = self.msg_get_changesets(&frame.payload).await {
                        if err.fatal() {
                            return Err(err);
                        }
                        // The receiver discards its switch-in shard on
                        // Fail and may retry.
                        error!("replication stream failed: {}", err);
                        self.stream
                            .send(&Frame::new(
                                u8::from(ReplicationReply::Fail),
                                err.to_string().into_bytes(),
                            ))
                            .await
                            .map_err(Error::Net)?;
                    }
                }
            }

            self.stream.flush().await.map_err(Error::Net)?;
        }
    }

    async fn msg_get_changesets(&mut self, payload: &[u8]) -> Result<(), Error> {
        let p = &mut &payload[..];
        let remote_uuid = String::from_utf8_lossy(unserialise_string(p)?).into_owned();
        let from_revision = unserialise_length(p, false)?;
        // Zero means "up to the latest"; the source always streams to
        // its current revision and reports it in EndOfChanges.
        let _to_revision = unserialise_length(p, false)?;
        let path = String::from_utf8_lossy(unserialise_string(p)?).into_owned();

        let endpoint = Endpoint::parse(&path)?;
        debug!(
            "changesets requested for {} from revision {} (uuid \"{}\")",
            endpoint, from_revision, remote_uuid,
        );

        // A writable checkout keeps commits out while the file set is
        // on the wire.
        let guard = self
            .pool
            .checkout(&endpoint, &Request::new(Flags::WRITABLE, CHECKOUT_TIMEOUT))
            .await?;

        let uuid = guard.uuid();
        let revision = guard.revision();

        let has_span = guard.with_index(|index| index.changesets_from(from_revision).is_ok());
        let needs_snapshot = remote_uuid != uuid || !has_span;

        let mut start_revision = from_revision;
        if needs_snapshot {
            let mut header = vec![];
            serialise_string(&mut header, uuid.as_bytes());
            serialise_length(&mut header, revision);
            self.send(ReplicationReply::DbHeader, header).await?;

            for file in guard.with_index(|index| index.snapshot_files()) {
                let name = file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.send(ReplicationReply::DbFilename, name.into_bytes())
                    .await?;
                self.stream
                    .send_file(u8::from(ReplicationReply::DbFiledata), &file)
                    .await
                    .map_err(Error::Net)?;
            }

            self.send(ReplicationReply::DbFooter, vec![]).await?;
            start_revision = revision;
            info!("streamed snapshot of {} at revision {}", endpoint, revision);
        }

        if start_revision < revision {
            let changesets = guard.with_index(|index| index.changesets_from(start_revision))?;
            for file in &changesets {
                self.stream
                    .send_file(u8::from(ReplicationReply::Changeset), file)
                    .await
                    .map_err(Error::Net)?;
            }
            debug!(
                "streamed {} changesets of {} ({} -> {})",
                changesets.len(),
                endpoint,
                start_revision,
                revision,
            );
        }

        let mut done = vec![];
        serialise_string(&mut done, uuid.as_bytes());
        serialise_length(&mut done, revision);
        self.send(ReplicationReply::EndOfChanges, done).await
    }

    async fn send(&mut self, reply: ReplicationReply, payload: Vec<u8>) -> Result<(), Error> {
        self.stream
            .send(&Frame::new(u8::from(reply), payload))
            .await
            .map_err(Error::Net)
    }
}

/// Client half: pulls one endpoint up to date from a source node.
pub struct Replication;

impl Replication {
    /// Connect to `source` and bring the local shard behind `endpoint`
    /// up to the source's revision. Returns the resulting revision.
    pub async fn replicate(pool: &Pool, source: &str, endpoint: &Endpoint) -> Result<u64, Error> {
        let stream = TcpStream::connect(source)
            .await
            .map_err(crate::net::Error::Io)?;
        Self::replicate_on(pool, FrameStream::new(stream), endpoint).await
    }

    async fn replicate_on(
        pool: &Pool,
        mut stream: FrameStream,
        endpoint: &Endpoint,
    ) -> Result<u64, Error> {
        // InitReplicationClient: nothing but the welcome is legal, and
        // the transition out of init happens exactly once.
        let welcome = stream.read_frame().await.map_err(Error::Net)?;
        if welcome.code != u8::from(ReplicationReply::Welcome) {
            return Err(Error::Remote("expected replication welcome".into()));
        }
        let state = ReplicaState::ReplicationClient;
        debug_assert_eq!(state, ReplicaState::ReplicationClient);

        let root = pool.config().root.clone();
        let live = root.join(&endpoint.path);

        // Where we are now; an absent or unreadable shard asks for a
        // full copy by sending an empty uuid.
        let (uuid, revision) = match Index::open(&live, false, false) {
            Ok(index) => (index.uuid().to_owned(), index.revision()),
            Err(_) => (String::new(), 0),
        };

        let mut request = vec![];
        serialise_string(&mut request, uuid.as_bytes());
        serialise_length(&mut request, revision);
        serialise_length(&mut request, 0); // to the latest
        serialise_string(&mut request, endpoint.path.as_bytes());
        stream
            .send_flush(&Frame::new(
                u8::from(ReplicationMessage::GetChangesets),
                request,
            ))
            .await
            .map_err(Error::Net)?;

        let mut switch = SwitchIn::new(live, root.join(format!("{}.switch", endpoint.path)));

        loop {
            let frame = stream.read_frame().await.map_err(Error::Net)?;
            match ReplicationReply::try_from(frame.code)? {
                ReplicationReply::DbHeader => {
                    switch.start_snapshot()?;
                }
                ReplicationReply::DbFilename => {
                    switch.filename =
                        Some(String::from_utf8_lossy(&frame.payload).into_owned());
                }
                ReplicationReply::DbFiledata => {
                    let temp = payload_path(&frame.payload)?;
                    switch.store_file(&temp)?;
                }
                ReplicationReply::DbFooter => {
                    switch.open()?;
                }
                ReplicationReply::Changeset => {
                    let temp = payload_path(&frame.payload)?;
                    let bytes = fs::read(&temp).map_err(crate::engine::Error::Io)?;
                    switch.apply_changeset(&bytes)?;
                }
                ReplicationReply::EndOfChanges => {
                    let p = &mut &frame.payload[..];
                    let uuid = String::from_utf8_lossy(unserialise_string(p)?).into_owned();
                    let revision = unserialise_length(p, false)?;
                    switch.swap(pool, endpoint).await?;
                    info!(
                        "replicated {} to revision {} (uuid \"{}\")",
                        endpoint, revision, uuid,
                    );
                    return Ok(revision);
                }
                ReplicationReply::Fail => {
                    switch.discard();
                    return Err(Error::ReplicationFailed(
                        String::from_utf8_lossy(&frame.payload).into_owned(),
                    ));
                }
                ReplicationReply::Exception => {
                    switch.discard();
                    let (_, _, message) = Error::unserialise(&frame.payload)?;
                    return Err(Error::Remote(message));
                }
                ReplicationReply::Welcome => {
                    switch.discard();
                    return Err(Error::Remote("unexpected welcome".into()));
                }
            }
        }
    }
}

/// The temporary shard being populated by an inbound stream.
struct SwitchIn {
    live: PathBuf,
    path: PathBuf,
    filename: Option<String>,
    index: Option<Index>,
    active: bool,
}

impl SwitchIn {
    fn new(live: PathBuf, path: PathBuf) -> Self {
        Self {
            live,
            path,
            filename: None,
            index: None,
            active: false,
        }
    }

    /// A full copy is coming: start from an empty directory.
    fn start_snapshot(&mut self) -> Result<(), Error> {
        self.index = None;
        if self.path.exists() {
            fs::remove_dir_all(&self.path).map_err(crate::engine::Error::Io)?;
        }
        fs::create_dir_all(self.path.join(WAL_DIR)).map_err(crate::engine::Error::Io)?;
        self.active = true;
        debug!("switch-in shard at {:?}", self.path);
        Ok(())
    }

    /// Place a streamed snapshot file under its announced name.
    fn store_file(&mut self, temp: &Path) -> Result<(), Error> {
        let name = self
            .filename
            .take()
            .ok_or_else(|| Error::Remote("file data without a filename".into()))?;
        // The temp file lives on another filesystem; copy, don't rename.
        fs::copy(temp, self.path.join(name)).map_err(crate::engine::Error::Io)?;
        Ok(())
    }

    /// Snapshot complete: open it for changeset replay.
    fn open(&mut self) -> Result<(), Error> {
        self.index = Some(Index::open(&self.path, true, false).map_err(Error::Engine)?);
        Ok(())
    }

    /// Changesets without a preceding snapshot replay onto a copy of
    /// the live shard.
    fn ensure_open(&mut self) -> Result<&mut Index, Error> {
        if self.index.is_none() {
            if !self.active {
                self.start_snapshot()?;
                copy_shard(&self.live, &self.path)?;
            }
            self.open()?;
        }
        Ok(self.index.as_mut().unwrap())
    }

    fn apply_changeset(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.ensure_open()?.apply_changeset(bytes)?;
        Ok(())
    }

    /// Atomically replace the live shard, under the endpoint lock so
    /// no checkout observes the swap mid-flight.
    async fn swap(&mut self, pool: &Pool, endpoint: &Endpoint) -> Result<(), Error> {
        let index = match self.index.take() {
            Some(index) => index,
            // Nothing arrived; the receiver was already up to date.
            None => {
                self.discard();
                return Ok(());
            }
        };
        let revision = index.revision();
        drop(index);

        pool.lock(endpoint, Instant::now() + LOCK_TIMEOUT).await?;

        let swapped = (|| {
            if self.live.exists() {
                fs::remove_dir_all(&self.live)?;
            }
            fs::rename(&self.path, &self.live)
        })();

        pool.invalidate(endpoint);
        pool.set_revision(endpoint, revision);
        pool.unlock(endpoint);

        match swapped {
            Ok(()) => {
                self.active = false;
                Ok(())
            }
            Err(err) => {
                self.discard();
                Err(Error::Engine(crate::engine::Error::Io(err)))
            }
        }
    }

    /// Throw the switch-in shard away; the live shard is untouched.
    fn discard(&mut self) {
        self.index = None;
        if self.active {
            let _ = fs::remove_dir_all(&self.path);
            self.active = false;
        }
    }
}

fn payload_path(payload: &[u8]) -> Result<PathBuf, Error> {
    Ok(PathBuf::from(
        std::str::from_utf8(payload)
            .map_err(|_| Error::Remote("bad file frame path".into()))?,
    ))
}

/// Copy a shard directory (baseline plus WAL) into a switch-in dir.
fn copy_shard(from: &Path, to: &Path) -> Result<(), Error> {
    let copy = |src: &Path, dst: &Path| -> std::io::Result<()> {
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), dst.join(entry.file_name()))?;
            }
        }
        Ok(())
    };

    copy(from, to).map_err(crate::engine::Error::Io)?;
    if from.join(WAL_DIR).exists() {
        copy(&from.join(WAL_DIR), &to.join(WAL_DIR)).map_err(crate::engine::Error::Io)?;
    }
    Ok(())
}
