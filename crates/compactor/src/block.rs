//! Output block accumulator.

use std::io::Read;

use backend::{BackendError, WorkingBlock};
use bloom::BloomFilter;
use encoding::{encode_object, BlockMeta, IndexWriter};
use uuid::Uuid;

use crate::WriteError;

/// One output block being filled by the merge.
///
/// Objects are framed and appended to a working block while metadata, the
/// index and the bloom filter are maintained in memory. The finalized views
/// ([`meta`](Self::meta), [`index`](Self::index), [`bloom`](Self::bloom))
/// can be taken any number of times and always agree with each other.
pub struct OutputBlock {
    working: Box<dyn WorkingBlock>,
    meta: BlockMeta,
    index: IndexWriter,
    bloom: BloomFilter,
    frame: Vec<u8>,
}

impl OutputBlock {
    /// `expected_records` sizes the bloom filter; writing more still works,
    /// at a higher false-positive rate.
    pub fn new(
        working: Box<dyn WorkingBlock>,
        inputs: &[BlockMeta],
        expected_records: u64,
        bloom_fp: f64,
        index_downsample: usize,
    ) -> Self {
        let meta = BlockMeta::compacted_from(
            working.block_id(),
            working.tenant(),
            inputs,
            bloom_fp,
            index_downsample.min(u32::MAX as usize) as u32,
        );
        let expected = usize::try_from(expected_records).unwrap_or(usize::MAX);
        Self {
            working,
            meta,
            index: IndexWriter::new(index_downsample.max(1)),
            bloom: BloomFilter::new(expected.max(1), bloom_fp),
            frame: Vec::new(),
        }
    }

    /// Frames `object` under `id` and appends it. Ids must strictly
    /// increase across calls.
    pub fn write(&mut self, id: &[u8], object: &[u8]) -> Result<(), WriteError> {
        if self.meta.total_objects > 0 && id <= self.meta.max_id.as_slice() {
            return Err(WriteError::OutOfOrder {
                id: id.to_vec(),
                previous: self.meta.max_id.clone(),
            });
        }

        self.frame.clear();
        encode_object(id, object, &mut self.frame)?;
        let offset = self.working.append(&self.frame)?;
        let len = self.frame.len();

        self.index.add(id, offset, len as u32);
        self.bloom.insert(id);
        self.meta.observe_object(id, len as u64);
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.meta.total_objects
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn block_id(&self) -> Uuid {
        self.meta.block_id
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.meta.tenant_id
    }

    #[must_use]
    pub fn meta(&self) -> BlockMeta {
        self.meta.clone()
    }

    /// Serialized index of everything written so far.
    #[must_use]
    pub fn index(&self) -> Vec<u8> {
        self.index.to_bytes()
    }

    /// Serialized bloom filter of every id written so far.
    #[must_use]
    pub fn bloom(&self) -> Vec<u8> {
        self.bloom.to_bytes()
    }

    /// Reads back the framed objects from the working block.
    pub fn data(&mut self) -> Result<Box<dyn Read + '_>, BackendError> {
        self.working.data()
    }

    /// Releases the working block.
    pub fn clear(self) -> Result<(), BackendError> {
        self.working.clear()
    }
}

impl std::fmt::Debug for OutputBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBlock")
            .field("block_id", &self.meta.block_id)
            .field("tenant", &self.meta.tenant_id)
            .field("records", &self.meta.total_objects)
            .field("size", &self.meta.size)
            .finish()
    }
}
