//! Object frame encoding.
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][id_len: u32 LE][id][object]
//! ```
//!
//! `frame_len` = 4 (crc) + 4 (id_len) + id + object. Decoding never trusts a
//! length field before checking it against the remaining buffer.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;

use crate::EncodingError;

/// `frame_len` + `crc32` + `id_len`.
pub const FRAME_HEADER_BYTES: usize = 4 + 4 + 4;

/// Maximum id size accepted in a frame or index record (64 KiB).
pub const MAX_ID_BYTES: usize = 64 * 1024;

/// Maximum object size accepted in a frame (64 MiB).
pub const MAX_OBJECT_BYTES: usize = 64 * 1024 * 1024;

/// A borrowed view of one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedObject<'a> {
    pub id: &'a [u8],
    pub object: &'a [u8],
}

/// Number of bytes [`encode_object`] appends for `(id, object)`.
#[must_use]
pub fn encoded_len(id: &[u8], object: &[u8]) -> usize {
    FRAME_HEADER_BYTES + id.len() + object.len()
}

/// Appends one framed object to `out`.
pub fn encode_object(id: &[u8], object: &[u8], out: &mut Vec<u8>) -> Result<(), EncodingError> {
    if id.len() > MAX_ID_BYTES {
        return Err(EncodingError::Malformed {
            what: "object frame",
            detail: format!("id_len {} exceeds maximum {}", id.len(), MAX_ID_BYTES),
        });
    }
    if object.len() > MAX_OBJECT_BYTES {
        return Err(EncodingError::Malformed {
            what: "object frame",
            detail: format!(
                "object length {} exceeds maximum {}",
                object.len(),
                MAX_OBJECT_BYTES
            ),
        });
    }

    let id_len = (id.len() as u32).to_le_bytes();
    let mut hasher = Crc32::new();
    hasher.update(&id_len);
    hasher.update(id);
    hasher.update(object);

    let frame_len = (encoded_len(id, object) - 4) as u32;
    out.reserve(encoded_len(id, object));
    out.write_u32::<LittleEndian>(frame_len)?;
    out.write_u32::<LittleEndian>(hasher.finalize())?;
    out.extend_from_slice(&id_len);
    out.extend_from_slice(id);
    out.extend_from_slice(object);
    Ok(())
}

/// Decodes the frame at the start of `buf`.
///
/// Returns the decoded view and the number of bytes it occupied.
pub fn decode_object(buf: &[u8]) -> Result<(DecodedObject<'_>, usize), EncodingError> {
    if buf.len() < FRAME_HEADER_BYTES {
        return Err(EncodingError::Truncated {
            what: "object frame header",
            needed: FRAME_HEADER_BYTES,
            available: buf.len(),
        });
    }

    let frame_len = LittleEndian::read_u32(&buf[0..4]) as usize;
    let expected_crc = LittleEndian::read_u32(&buf[4..8]);
    let id_len = LittleEndian::read_u32(&buf[8..12]) as usize;

    if frame_len < FRAME_HEADER_BYTES - 4 || frame_len > MAX_ID_BYTES + MAX_OBJECT_BYTES + 8 {
        return Err(EncodingError::Malformed {
            what: "object frame",
            detail: format!("frame_len {} out of range", frame_len),
        });
    }
    if id_len > MAX_ID_BYTES || id_len > frame_len - 8 {
        return Err(EncodingError::Malformed {
            what: "object frame",
            detail: format!("id_len {} does not fit frame_len {}", id_len, frame_len),
        });
    }

    let consumed = 4 + frame_len;
    if consumed > buf.len() {
        return Err(EncodingError::Truncated {
            what: "object frame",
            needed: consumed,
            available: buf.len(),
        });
    }

    let body = &buf[8..consumed];
    let mut hasher = Crc32::new();
    hasher.update(body);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        return Err(EncodingError::ChecksumMismatch {
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    let id = &body[4..4 + id_len];
    let object = &body[4 + id_len..];
    Ok((DecodedObject { id, object }, consumed))
}

/// Sequential frame decoder over a byte slice.
pub struct ObjectReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ObjectReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Decodes the next frame, or `None` once the slice is fully consumed.
    pub fn next_object(&mut self) -> Result<Option<DecodedObject<'a>>, EncodingError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let (obj, consumed) = decode_object(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(Some(obj))
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }
}
