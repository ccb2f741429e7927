//! Cursor over one input block.
//!
//! A [`Bookmark`] walks the block's index and pulls object bytes from the
//! backend in chunks: consecutive index records are accumulated until their
//! combined length reaches the chunk threshold (or the index runs out), then
//! a single ranged read fetches the whole span. Objects are decoded from the
//! buffered chunk one at a time.

use std::iter::Peekable;
use std::vec;

use backend::BlockReader;
use encoding::{decode_object, EncodingError, Record};
use tracing::debug;
use uuid::Uuid;

use crate::CompactionError;

/// Counters collected while reading one input block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookmarkStats {
    pub chunks_fetched: u64,
    pub bytes_fetched: u64,
    pub objects_decoded: u64,
}

impl BookmarkStats {
    pub(crate) fn absorb(&mut self, other: BookmarkStats) {
        self.chunks_fetched += other.chunks_fetched;
        self.bytes_fetched += other.bytes_fetched;
        self.objects_decoded += other.objects_decoded;
    }
}

pub struct Bookmark<'a> {
    reader: &'a dyn BlockReader,
    block_id: Uuid,
    tenant: &'a str,
    records: Peekable<vec::IntoIter<Record>>,
    chunk_size: u64,
    /// Where the next index record has to start.
    next_start: Option<u64>,
    buffer: Vec<u8>,
    pos: usize,
    current: Option<(Vec<u8>, Vec<u8>)>,
    last_id: Option<Vec<u8>>,
    stats: BookmarkStats,
}

impl<'a> Bookmark<'a> {
    /// `records` is the block's decoded index, in file order.
    pub fn new(
        reader: &'a dyn BlockReader,
        block_id: Uuid,
        tenant: &'a str,
        records: Vec<Record>,
        chunk_size: u32,
    ) -> Self {
        Self {
            reader,
            block_id,
            tenant,
            records: records.into_iter().peekable(),
            chunk_size: u64::from(chunk_size.max(1)),
            next_start: None,
            buffer: Vec::new(),
            pos: 0,
            current: None,
            last_id: None,
            stats: BookmarkStats::default(),
        }
    }

    #[must_use]
    pub fn block_id(&self) -> Uuid {
        self.block_id
    }

    #[must_use]
    pub fn stats(&self) -> BookmarkStats {
        self.stats
    }

    /// Makes sure a current pair is cached, decoding (and fetching) as
    /// needed. Returns `false` once the block is exhausted.
    pub fn load_current(&mut self) -> Result<bool, CompactionError> {
        if self.current.is_some() {
            return Ok(true);
        }
        if self.pos == self.buffer.len() && !self.fetch_chunk()? {
            return Ok(false);
        }

        let (obj, consumed) =
            decode_object(&self.buffer[self.pos..]).map_err(|e| self.decode_error(e))?;
        if consumed == 0 || consumed > self.buffer.len() - self.pos {
            return Err(self.malformed(format!(
                "decoder consumed {} of {} buffered bytes",
                consumed,
                self.buffer.len() - self.pos
            )));
        }
        if let Some(prev) = &self.last_id {
            if obj.id <= prev.as_slice() {
                return Err(self.malformed(format!(
                    "id {:?} does not follow {:?}",
                    obj.id, prev
                )));
            }
        }

        let pair = (obj.id.to_vec(), obj.object.to_vec());
        self.pos += consumed;
        self.stats.objects_decoded += 1;
        self.last_id = Some(pair.0.clone());
        self.current = Some(pair);
        Ok(true)
    }

    /// The cached pair, if [`load_current`](Self::load_current) produced one.
    #[must_use]
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        self.current
            .as_ref()
            .map(|(id, obj)| (id.as_slice(), obj.as_slice()))
    }

    /// Moves the cached pair out, leaving the bookmark advanced.
    pub fn take_current(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.current.take()
    }

    /// Discards the cached pair.
    pub fn advance(&mut self) {
        self.current = None;
    }

    /// True once every object has been handed out.
    #[must_use]
    pub fn done(&self) -> bool {
        self.current.is_none() && self.pos == self.buffer.len() && self.records.len() == 0
    }

    /// Reads the next span of records into the buffer. Returns `false` when
    /// the index is exhausted.
    fn fetch_chunk(&mut self) -> Result<bool, CompactionError> {
        let mut first_start = None;
        let mut total: u64 = 0;

        while total < self.chunk_size {
            let Some(rec) = self.records.peek() else {
                break;
            };
            if total > 0 && total + u64::from(rec.length) > u64::from(u32::MAX) {
                break;
            }
            let Some(rec) = self.records.next() else {
                break;
            };
            if rec.length == 0 {
                return Err(self.malformed(format!("index record {:?} has zero length", rec.id)));
            }
            if let Some(expected) = self.next_start {
                if rec.start != expected {
                    return Err(self.malformed(format!(
                        "index record {:?} starts at {}, previous record ended at {}",
                        rec.id, rec.start, expected
                    )));
                }
            }
            let Some(end) = rec.end() else {
                return Err(self.malformed(format!(
                    "index record {:?} at {} with length {} overflows the block",
                    rec.id, rec.start, rec.length
                )));
            };
            first_start.get_or_insert(rec.start);
            self.next_start = Some(end);
            total += u64::from(rec.length);
        }

        let Some(start) = first_start else {
            return Ok(false);
        };
        // The loop above keeps every span within u32.
        let length = total as u32;
        let bytes = self
            .reader
            .read_object_range(self.block_id, self.tenant, start, length)
            .map_err(|source| CompactionError::Read {
                block_id: self.block_id,
                source,
            })?;
        if bytes.len() as u64 != total {
            return Err(self.decode_error(EncodingError::Truncated {
                what: "object range",
                needed: total as usize,
                available: bytes.len(),
            }));
        }

        self.stats.chunks_fetched += 1;
        self.stats.bytes_fetched += total;
        debug!(block_id = %self.block_id, start, length, "chunk fetched");

        self.buffer = bytes;
        self.pos = 0;
        Ok(true)
    }

    fn decode_error(&self, source: EncodingError) -> CompactionError {
        CompactionError::Decode {
            block_id: self.block_id,
            source,
        }
    }

    fn malformed(&self, detail: String) -> CompactionError {
        self.decode_error(EncodingError::Malformed {
            what: "block",
            detail,
        })
    }
}

impl std::fmt::Debug for Bookmark<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bookmark")
            .field("block_id", &self.block_id)
            .field("tenant", &self.tenant)
            .field("buffered", &(self.buffer.len() - self.pos))
            .field("has_current", &self.current.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
