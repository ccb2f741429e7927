//! Index records.
//!
//! ```text
//! [id_len: u32 LE][id][start: u64 LE][length: u32 LE]
//! ```
//!
//! Records are sorted ascending by id and their byte ranges are contiguous:
//! each record starts where the previous one ended.

use byteorder::{ByteOrder, LittleEndian};

use crate::format::MAX_ID_BYTES;
use crate::EncodingError;

/// One index entry: the largest id of a group of objects and the byte range
/// holding that group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Vec<u8>,
    pub start: u64,
    pub length: u32,
}

impl Record {
    /// Offset one past the last byte covered by this record, or `None` if it
    /// does not fit in a u64.
    #[must_use]
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(u64::from(self.length))
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.id.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.start.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
    }
}

/// Builds a downsampled index while objects are appended.
///
/// Every `downsample` objects are folded into a single [`Record`]. The
/// builder can be serialized at any point without being consumed.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    downsample: usize,
    records: Vec<Record>,
    pending: Option<Record>,
    pending_objects: usize,
}

impl IndexWriter {
    /// # Panics
    ///
    /// Panics if `downsample` is 0.
    pub fn new(downsample: usize) -> Self {
        assert!(downsample > 0, "downsample must be > 0");
        Self {
            downsample,
            records: Vec::new(),
            pending: None,
            pending_objects: 0,
        }
    }

    /// Registers an object of `length` bytes stored at `start`.
    ///
    /// Objects must be added in ascending id order and at contiguous offsets.
    /// A group is sealed early if its length would overflow `u32`.
    pub fn add(&mut self, id: &[u8], start: u64, length: u32) {
        let overflows = self
            .pending
            .as_ref()
            .is_some_and(|rec| rec.length.checked_add(length).is_none());
        if overflows {
            self.seal();
        }

        match self.pending.as_mut() {
            Some(rec) => {
                rec.id.clear();
                rec.id.extend_from_slice(id);
                rec.length += length;
            }
            None => {
                self.pending = Some(Record {
                    id: id.to_vec(),
                    start,
                    length,
                });
            }
        }
        self.pending_objects += 1;

        if self.pending_objects == self.downsample {
            self.seal();
        }
    }

    fn seal(&mut self) {
        if let Some(rec) = self.pending.take() {
            self.records.push(rec);
        }
        self.pending_objects = 0;
    }

    /// Number of records the serialized index holds.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len() + usize::from(self.pending.is_some())
    }

    /// Serializes all sealed records plus the open group, if any.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for rec in self.records.iter().chain(self.pending.iter()) {
            rec.encode_into(&mut out);
        }
        out
    }
}

/// Walks serialized index bytes one record at a time.
#[derive(Debug, Clone)]
pub struct IndexCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl IndexCursor {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Decodes the next record and advances past it.
    pub fn next_record(&mut self) -> Result<Option<Record>, EncodingError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let rest = &self.buf[self.pos..];
        if rest.len() < 4 {
            return Err(EncodingError::Truncated {
                what: "index record",
                needed: 4,
                available: rest.len(),
            });
        }
        let id_len = LittleEndian::read_u32(&rest[0..4]) as usize;
        if id_len > MAX_ID_BYTES {
            return Err(EncodingError::Malformed {
                what: "index record",
                detail: format!("id_len {} exceeds maximum {}", id_len, MAX_ID_BYTES),
            });
        }
        let needed = 4 + id_len + 8 + 4;
        if rest.len() < needed {
            return Err(EncodingError::Truncated {
                what: "index record",
                needed,
                available: rest.len(),
            });
        }

        let id = rest[4..4 + id_len].to_vec();
        let start = LittleEndian::read_u64(&rest[4 + id_len..12 + id_len]);
        let length = LittleEndian::read_u32(&rest[12 + id_len..needed]);
        self.pos += needed;

        Ok(Some(Record { id, start, length }))
    }

    /// Decodes every remaining record.
    pub fn collect_records(mut self) -> Result<Vec<Record>, EncodingError> {
        let mut out = Vec::new();
        while let Some(rec) = self.next_record()? {
            out.push(rec);
        }
        Ok(out)
    }
}
