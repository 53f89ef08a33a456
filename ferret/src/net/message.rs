//! Framed protocol messages.
//!
//! Every message on the wire is `code:u8 | length:var-uint | payload`.
//! The special code `0xFD` announces that the next payload is a file
//! stream carried as length-prefixed chunks (see [`crate::net::stream`]).

use bytes::{BufMut, Bytes, BytesMut};

use super::length::{serialise_length, unserialise_length_partial};
use super::Error;

/// Marker byte: the next frame's payload is backed by a file.
pub const FILE_FOLLOWS: u8 = 0xFD;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type code.
    pub code: u8,
    /// Raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// New frame with a payload.
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// New frame with an empty payload.
    pub fn empty(code: u8) -> Self {
        Self {
            code,
            payload: Bytes::new(),
        }
    }

    /// Wire encoding of the frame.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 12);
        buf.put_u8(self.code);
        serialise_length(&mut buf, self.payload.len() as u64);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Try to parse one frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffer doesn't hold a complete frame
    /// yet. The buffer is only consumed on a successful parse. File
    /// frames are not handled here; callers check for [`FILE_FOLLOWS`]
    /// before calling.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let code = buf[0];
        let mut p = &buf[1..];
        let len = match unserialise_length_partial(&mut p, false)? {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        let header = buf.len() - p.len();

        if p.len() < len {
            return Ok(None);
        }

        let _ = buf.split_to(header);
        let payload = buf.split_to(len).freeze();

        Ok(Some(Frame { code, payload }))
    }
}
