//! Framed network stream.
//!
//! Wraps a buffered socket and speaks the binary framing: regular
//! messages are parsed off an accumulation buffer, file frames are
//! spooled to a per-connection temp directory and surfaced as a
//! synthetic message whose payload is the file path.

use std::path::{Path, PathBuf};

use bytes::{Buf, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::trace;

use super::length::{serialise_length, unserialise_length_partial};
use super::message::{Frame, FILE_FOLLOWS};
use super::Error;

/// File streaming chunk size.
const FILE_BUF_SIZE: usize = 4096;

/// A connection speaking the framed binary protocol.
#[derive(Debug)]
pub struct FrameStream<S = TcpStream> {
    stream: BufStream<S>,
    buffer: BytesMut,
    temp_dir: Option<tempfile::TempDir>,
    temp_files: usize,
}

impl FrameStream<TcpStream> {
    /// Wrap a TCP connection.
    pub fn new(stream: TcpStream) -> Self {
        Self::wrap(stream)
    }

    /// Peer address, if the socket still has one.
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.get_ref().peer_addr().ok()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameStream<S> {
    /// Wrap any async stream; used by tests with in-memory duplexes.
    pub fn wrap(stream: S) -> Self {
        Self {
            stream: BufStream::with_capacity(9126, 9126, stream),
            buffer: BytesMut::with_capacity(FILE_BUF_SIZE),
            temp_dir: None,
            temp_files: 0,
        }
    }

    /// Read the next complete frame.
    ///
    /// A `FILE_FOLLOWS` prelude switches to file mode: the payload
    /// chunks are written to a temp file and the returned frame carries
    /// the file path instead.
    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        loop {
            if self.buffer.len() >= 2 && self.buffer[0] == FILE_FOLLOWS {
                let code = self.buffer[1];
                self.buffer.advance(2);
                let path = self.read_file_body().await?;
                trace!("received file frame {} into {:?}", code, path);
                return Ok(Frame::new(
                    code,
                    path.to_string_lossy().into_owned().into_bytes(),
                ));
            }

            if let Some(frame) = Frame::parse(&mut self.buffer)? {
                trace!("received frame {} [{} bytes]", frame.code, frame.payload.len());
                return Ok(frame);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(Error::Eof);
            }
        }
    }

    /// Queue a frame for writing. Call [`Self::flush`] to push it out.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), Error> {
        trace!("sending frame {} [{} bytes]", frame.code, frame.payload.len());
        self.stream.write_all(&frame.to_bytes()).await?;
        Ok(())
    }

    /// Queue a frame and flush the socket.
    pub async fn send_flush(&mut self, frame: &Frame) -> Result<(), Error> {
        self.send(frame).await?;
        self.flush().await
    }

    /// Stream a file as a `FILE_FOLLOWS` frame: marker, user-visible
    /// code, then length-prefixed chunks closed by a zero-length chunk.
    pub async fn send_file(&mut self, code: u8, path: &Path) -> Result<(), Error> {
        trace!("sending file frame {} from {:?}", code, path);
        self.stream.write_all(&[FILE_FOLLOWS, code]).await?;

        let mut file = File::open(path).await?;
        let mut chunk = [0u8; FILE_BUF_SIZE];
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let mut header = Vec::with_capacity(12);
            serialise_length(&mut header, n as u64);
            self.stream.write_all(&header).await?;
            self.stream.write_all(&chunk[..n]).await?;
        }

        self.stream.write_all(&[0x00]).await?;
        self.flush().await
    }

    /// Flush buffered writes to the socket.
    pub async fn flush(&mut self) -> Result<(), Error> {
        self.stream.flush().await?;
        Ok(())
    }

    /// No unread data is pending on this connection.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    fn next_temp_path(&mut self) -> Result<PathBuf, Error> {
        if self.temp_dir.is_none() {
            let dir = tempfile::Builder::new().prefix("ferret-net-").tempdir()?;
            self.temp_dir = Some(dir);
        }
        self.temp_files += 1;
        Ok(self
            .temp_dir
            .as_ref()
            .unwrap()
            .path()
            .join(format!("file-{}", self.temp_files)))
    }

    async fn read_file_body(&mut self) -> Result<PathBuf, Error> {
        let path = self.next_temp_path()?;
        let mut file = File::create(&path).await?;

        loop {
            let chunk = loop {
                let mut p = &self.buffer[..];
                if let Some(len) = unserialise_length_partial(&mut p, false)? {
                    let header = self.buffer.len() - p.len();
                    let len = len as usize;
                    if self.buffer.len() - header >= len {
                        self.buffer.advance(header);
                        break self.buffer.split_to(len);
                    }
                }
                if self.stream.read_buf(&mut self.buffer).await? == 0 {
                    return Err(Error::Eof);
                }
            };

            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_and_read() {
        let (client, server) = duplex(64 * 1024);
        let mut client = FrameStream::wrap(client);
        let mut server = FrameStream::wrap(server);

        client
            .send_flush(&Frame::new(5, &b"payload"[..]))
            .await
            .unwrap();
        client.send_flush(&Frame::empty(9)).await.unwrap();

        let first = server.read_frame().await.unwrap();
        assert_eq!(first.code, 5);
        assert_eq!(&first.payload[..], b"payload");

        let second = server.read_frame().await.unwrap();
        assert_eq!(second.code, 9);
        assert!(second.payload.is_empty());
    }

    #[tokio::test]
    async fn test_file_frame() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("changes.1");
        let contents = vec![42u8; 10_000]; // spans multiple chunks
        std::fs::write(&src, &contents).unwrap();

        let (client, server) = duplex(64 * 1024);
        let mut client = FrameStream::wrap(client);
        let mut server = FrameStream::wrap(server);

        let send = tokio::spawn(async move {
            client.send_file(33, &src).await.unwrap();
            client
        });

        let frame = server.read_frame().await.unwrap();
        assert_eq!(frame.code, 33);

        let path = String::from_utf8(frame.payload.to_vec()).unwrap();
        let received = std::fs::read(&path).unwrap();
        assert_eq!(received, contents);

        send.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof() {
        let (client, server) = duplex(1024);
        drop(client);
        let mut server = FrameStream::wrap(server);
        assert!(matches!(server.read_frame().await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_frame_after_file_frame() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("snapshot");
        std::fs::write(&src, b"file body").unwrap();

        let (client, server) = duplex(64 * 1024);
        let mut client = FrameStream::wrap(client);
        let mut server = FrameStream::wrap(server);

        client.send_file(1, &src).await.unwrap();
        client.send_flush(&Frame::new(2, &b"after"[..])).await.unwrap();

        let file_frame = server.read_frame().await.unwrap();
        assert_eq!(file_frame.code, 1);

        let regular = server.read_frame().await.unwrap();
        assert_eq!(regular.code, 2);
        assert_eq!(&regular.payload[..], b"after");
    }
}
