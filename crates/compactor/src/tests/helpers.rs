use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use backend::{
    BackendError, BlockMarker, BlockReader, BlockWriter, MemoryBackend, WorkingBlock,
    WorkingBlockAllocator,
};
use bloom::BloomFilter;
use config::CompactorConfig;
use encoding::{encode_object, BlockMeta, IndexCursor, IndexWriter, ObjectReader, Record};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Compactor;

pub type Pairs = Vec<(Vec<u8>, Vec<u8>)>;

pub const TENANT: &str = "acme";

/// Big-endian so byte order matches numeric order.
pub fn id(n: u64) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

pub fn pairs(items: &[(u64, &str)]) -> Pairs {
    items
        .iter()
        .map(|(n, obj)| (id(*n), obj.as_bytes().to_vec()))
        .collect()
}

/// A serialized input block.
pub struct RawBlock {
    pub meta: BlockMeta,
    pub bloom: Vec<u8>,
    pub index: Vec<u8>,
    pub data: Vec<u8>,
}

pub fn frame_block(block_id: Uuid, tenant: &str, items: &Pairs, downsample: usize) -> RawBlock {
    let mut meta = BlockMeta::new(block_id, tenant);
    meta.index_downsample = downsample as u32;
    let mut index = IndexWriter::new(downsample);
    let mut data = Vec::new();
    for (id, obj) in items {
        let start = data.len();
        encode_object(id, obj, &mut data).unwrap();
        let len = data.len() - start;
        index.add(id, start as u64, len as u32);
        meta.observe_object(id, len as u64);
    }
    let bloom = BloomFilter::from_ids(items.len(), 0.01, items.iter().map(|(id, _)| id.as_slice()));
    RawBlock {
        meta,
        bloom: bloom.to_bytes(),
        index: index.to_bytes(),
        data,
    }
}

/// An index whose first record runs past `u64::MAX`.
pub fn overflowing_index() -> Vec<u8> {
    let mut index = IndexWriter::new(1);
    index.add(&id(1), u64::MAX - 4, 30);
    index.add(&id(2), 0, 30);
    index.to_bytes()
}

pub fn put_raw(writer: &dyn BlockWriter, raw: &RawBlock) -> Result<Uuid> {
    writer.write_block(
        raw.meta.block_id,
        &raw.meta.tenant_id,
        &raw.meta.to_json()?,
        &raw.bloom,
        &raw.index,
        &mut raw.data.as_slice(),
    )?;
    Ok(raw.meta.block_id)
}

/// Writes a well-formed block holding `items` (already sorted).
pub fn put_block(writer: &dyn BlockWriter, items: &Pairs) -> Result<Uuid> {
    put_block_with(writer, items, 1, |_| {})
}

pub fn put_block_with(
    writer: &dyn BlockWriter,
    items: &Pairs,
    downsample: usize,
    tweak: impl FnOnce(&mut BlockMeta),
) -> Result<Uuid> {
    let mut raw = frame_block(Uuid::new_v4(), TENANT, items, downsample);
    tweak(&mut raw.meta);
    put_raw(writer, &raw)
}

pub fn index_records(reader: &dyn BlockReader, block_id: Uuid) -> Result<Vec<Record>> {
    Ok(IndexCursor::new(reader.read_index(block_id, TENANT)?).collect_records()?)
}

/// Decodes every object stored in a block.
pub fn read_objects(backend: &MemoryBackend, block_id: Uuid) -> Result<Pairs> {
    let block = backend
        .block(block_id, TENANT)
        .ok_or_else(|| anyhow::anyhow!("block {} missing", block_id))?;
    let mut reader = ObjectReader::new(&block.data);
    let mut out = Vec::new();
    while let Some(obj) = reader.next_object()? {
        out.push((obj.id.to_vec(), obj.object.to_vec()));
    }
    Ok(out)
}

pub fn read_meta(backend: &MemoryBackend, block_id: Uuid) -> Result<BlockMeta> {
    Ok(BlockMeta::from_json(&backend.read_block_meta(block_id, TENANT)?)?)
}

pub fn config() -> CompactorConfig {
    CompactorConfig::default()
        .with_index_downsample(1)
        .with_chunk_size_bytes(64)
}

pub fn compactor_for(backend: &MemoryBackend, cfg: CompactorConfig) -> Compactor {
    let shared = Arc::new(backend.clone());
    Compactor::from_backend(shared.clone(), shared, cfg).unwrap()
}

// -------------------- Fault injection --------------------

/// Delegates to a [`MemoryBackend`] but fails the n-th `write_block` call
/// (1-based).
pub struct FailingWriter {
    pub inner: MemoryBackend,
    pub fail_on: usize,
    pub calls: AtomicUsize,
}

impl FailingWriter {
    pub fn new(inner: MemoryBackend, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

impl BlockWriter for FailingWriter {
    fn write_block(
        &self,
        block_id: Uuid,
        tenant: &str,
        meta: &[u8],
        bloom: &[u8],
        index: &[u8],
        data: &mut dyn Read,
    ) -> Result<(), BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(BackendError::Other("injected write failure".into()));
        }
        self.inner
            .write_block(block_id, tenant, meta, bloom, index, data)
    }
}

/// Fails to mark one specific block.
pub struct FailingMarker {
    pub inner: MemoryBackend,
    pub fail_for: Uuid,
}

impl BlockMarker for FailingMarker {
    fn mark_compacted(&self, block_id: Uuid, tenant: &str) -> Result<(), BackendError> {
        if block_id == self.fail_for {
            return Err(BackendError::Other("injected mark failure".into()));
        }
        self.inner.mark_compacted(block_id, tenant)
    }
}

/// Cancels a token the first time objects are fetched.
pub struct CancellingReader {
    pub inner: MemoryBackend,
    pub token: CancellationToken,
}

impl BlockReader for CancellingReader {
    fn read_index(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        self.inner.read_index(block_id, tenant)
    }

    fn read_block_meta(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        self.inner.read_block_meta(block_id, tenant)
    }

    fn read_object_range(
        &self,
        block_id: Uuid,
        tenant: &str,
        start: u64,
        length: u32,
    ) -> Result<Vec<u8>, BackendError> {
        self.token.cancel();
        self.inner.read_object_range(block_id, tenant, start, length)
    }

    fn tenants(&self) -> Result<Vec<String>, BackendError> {
        self.inner.tenants()
    }

    fn blocks(&self, tenant: &str) -> Result<Vec<Uuid>, BackendError> {
        self.inner.blocks(tenant)
    }
}

/// Working blocks whose `clear` always fails.
pub struct StickyStaging {
    pub inner: MemoryBackend,
}

struct StickyBlock(Box<dyn WorkingBlock>);

impl WorkingBlock for StickyBlock {
    fn block_id(&self) -> Uuid {
        self.0.block_id()
    }

    fn tenant(&self) -> &str {
        self.0.tenant()
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, BackendError> {
        self.0.append(bytes)
    }

    fn size(&self) -> u64 {
        self.0.size()
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>, BackendError> {
        self.0.data()
    }

    fn clear(self: Box<Self>) -> Result<(), BackendError> {
        Err(BackendError::Other("injected clear failure".into()))
    }
}

impl WorkingBlockAllocator for StickyStaging {
    fn new_working_block(
        &self,
        block_id: Uuid,
        tenant: &str,
    ) -> Result<Box<dyn WorkingBlock>, BackendError> {
        Ok(Box::new(StickyBlock(
            self.inner.new_working_block(block_id, tenant)?,
        )))
    }
}
