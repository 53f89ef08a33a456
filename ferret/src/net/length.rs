//! Variable-length integer and length-prefixed string framing.
//!
//! Lengths below 255 fit in one byte. Larger values send the marker
//! byte `0xFF` followed by `value - 255` as a little-endian stream of
//! 7-bit groups, closed by a terminal byte with the high bit set.

use bytes::BufMut;

use super::Error;

/// Length marker for the multi-byte encoding.
const MARKER: u8 = 0xFF;

/// Upper bound on the encoded size of any `u64`:
/// marker + 7-bit groups + terminator.
pub const MAX_LENGTH_SIZE: usize = 1 + (u64::BITS as usize).div_ceil(7) + 1;

/// Append an encoded length to a buffer.
pub fn serialise_length(buf: &mut impl BufMut, len: u64) {
    if len < 255 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u8(MARKER);
        let mut rest = len - 255;
        while rest != 0 {
            buf.put_u8((rest & 0x7F) as u8);
            rest >>= 7;
        }
        buf.put_u8(0x80);
    }
}

/// Encoded length as its own buffer.
pub fn serialise_length_vec(len: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_LENGTH_SIZE);
    serialise_length(&mut buf, len);
    buf
}

/// Decode a length, advancing the slice past it.
///
/// The slice is left untouched when the encoding is incomplete or
/// malformed. With `check_remaining`, the decoded length must not
/// exceed the data left in the slice.
pub fn unserialise_length(p: &mut &[u8], check_remaining: bool) -> Result<u64, Error> {
    unserialise_length_partial(p, check_remaining)?
        .ok_or(Error::Serialisation("bad encoded length: insufficient data"))
}

/// Incremental variant of [`unserialise_length`]: `Ok(None)` means the
/// encoding is valid so far but more bytes are needed.
pub fn unserialise_length_partial(
    p: &mut &[u8],
    check_remaining: bool,
) -> Result<Option<u64>, Error> {
    let buf = *p;

    let (&first, mut rest) = match buf.split_first() {
        Some(split) => split,
        None => return Ok(None),
    };

    let mut len = first as u64;
    if first == MARKER {
        len = 0;
        let mut shift = 0u32;
        loop {
            let (&ch, tail) = match rest.split_first() {
                Some(split) => split,
                None => return Ok(None),
            };
            rest = tail;

            let chunk = (ch & 0x7F) as u64;
            if chunk != 0 {
                if shift >= u64::BITS || chunk > (u64::MAX >> shift) {
                    return Err(Error::Serialisation("bad encoded length: overflow"));
                }
                len |= chunk << shift;
            }
            shift += 7;

            if ch & 0x80 != 0 {
                break;
            }
            if shift > 70 {
                return Err(Error::Serialisation("bad encoded length: overflow"));
            }
        }
        len = len
            .checked_add(255)
            .ok_or(Error::Serialisation("bad encoded length: overflow"))?;
    }

    if check_remaining && len > rest.len() as u64 {
        return Err(Error::Serialisation(
            "bad encoded length: length greater than data",
        ));
    }

    *p = rest;
    Ok(Some(len))
}

/// Append a length-prefixed string to a buffer.
pub fn serialise_string(buf: &mut impl BufMut, input: &[u8]) {
    serialise_length(buf, input.len() as u64);
    buf.put_slice(input);
}

/// Decode a length-prefixed string, advancing the slice past it.
pub fn unserialise_string<'a>(p: &mut &'a [u8]) -> Result<&'a [u8], Error> {
    let mut cursor = *p;
    let len = unserialise_length(&mut cursor, true)? as usize;
    let (string, rest) = cursor.split_at(len);
    *p = rest;
    Ok(string)
}
