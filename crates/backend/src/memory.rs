//! In-process storage implementing every backend trait.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::{
    validate_tenant, BackendError, BlockMarker, BlockReader, BlockWriter, WorkingBlock,
    WorkingBlockAllocator,
};

/// One block held by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub meta: Vec<u8>,
    pub bloom: Vec<u8>,
    pub index: Vec<u8>,
    pub data: Vec<u8>,
    pub compacted: bool,
}

type BlockKey = (String, Uuid);

/// Thread-safe in-memory block store. Cloning shares the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    blocks: Arc<Mutex<BTreeMap<BlockKey, StoredBlock>>>,
    live_working_blocks: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a stored block, compacted or not.
    pub fn block(&self, block_id: Uuid, tenant: &str) -> Option<StoredBlock> {
        self.lock()
            .ok()?
            .get(&(tenant.to_string(), block_id))
            .cloned()
    }

    /// Whether the block exists and has been marked compacted.
    pub fn is_compacted(&self, block_id: Uuid, tenant: &str) -> bool {
        self.block(block_id, tenant).is_some_and(|b| b.compacted)
    }

    /// Number of working blocks allocated and not yet cleared.
    pub fn live_working_blocks(&self) -> usize {
        self.live_working_blocks.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<BlockKey, StoredBlock>>, BackendError> {
        self.blocks
            .lock()
            .map_err(|e| BackendError::Other(format!("lock poisoned: {}", e)))
    }

    fn with_block<T>(
        &self,
        block_id: Uuid,
        tenant: &str,
        f: impl FnOnce(&StoredBlock) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let blocks = self.lock()?;
        let block = blocks
            .get(&(tenant.to_string(), block_id))
            .ok_or_else(|| BackendError::NotFound {
                block_id,
                tenant: tenant.to_string(),
            })?;
        f(block)
    }
}

impl BlockReader for MemoryBackend {
    fn read_index(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        self.with_block(block_id, tenant, |b| Ok(b.index.clone()))
    }

    fn read_block_meta(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        self.with_block(block_id, tenant, |b| Ok(b.meta.clone()))
    }

    fn read_object_range(
        &self,
        block_id: Uuid,
        tenant: &str,
        start: u64,
        length: u32,
    ) -> Result<Vec<u8>, BackendError> {
        self.with_block(block_id, tenant, |b| {
            let size = b.data.len() as u64;
            let end = match start.checked_add(u64::from(length)) {
                Some(end) if end <= size => end,
                end => {
                    return Err(BackendError::OutOfRange {
                        block_id,
                        start,
                        end: end.unwrap_or(u64::MAX),
                        size,
                    })
                }
            };
            Ok(b.data[start as usize..end as usize].to_vec())
        })
    }

    fn tenants(&self) -> Result<Vec<String>, BackendError> {
        let mut tenants: Vec<String> = self.lock()?.keys().map(|(t, _)| t.clone()).collect();
        tenants.dedup();
        Ok(tenants)
    }

    fn blocks(&self, tenant: &str) -> Result<Vec<Uuid>, BackendError> {
        Ok(self
            .lock()?
            .iter()
            .filter(|((t, _), b)| t == tenant && !b.compacted)
            .map(|((_, id), _)| *id)
            .collect())
    }
}

impl BlockWriter for MemoryBackend {
    fn write_block(
        &self,
        block_id: Uuid,
        tenant: &str,
        meta: &[u8],
        bloom: &[u8],
        index: &[u8],
        data: &mut dyn Read,
    ) -> Result<(), BackendError> {
        validate_tenant(tenant)?;
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;

        let mut blocks = self.lock()?;
        let key = (tenant.to_string(), block_id);
        if blocks.contains_key(&key) {
            return Err(BackendError::AlreadyExists {
                block_id,
                tenant: tenant.to_string(),
            });
        }
        blocks.insert(
            key,
            StoredBlock {
                meta: meta.to_vec(),
                bloom: bloom.to_vec(),
                index: index.to_vec(),
                data: bytes,
                compacted: false,
            },
        );
        Ok(())
    }
}

impl BlockMarker for MemoryBackend {
    fn mark_compacted(&self, block_id: Uuid, tenant: &str) -> Result<(), BackendError> {
        let mut blocks = self.lock()?;
        match blocks.get_mut(&(tenant.to_string(), block_id)) {
            Some(b) => {
                b.compacted = true;
                Ok(())
            }
            None => Err(BackendError::NotFound {
                block_id,
                tenant: tenant.to_string(),
            }),
        }
    }
}

impl WorkingBlockAllocator for MemoryBackend {
    fn new_working_block(
        &self,
        block_id: Uuid,
        tenant: &str,
    ) -> Result<Box<dyn WorkingBlock>, BackendError> {
        validate_tenant(tenant)?;
        self.live_working_blocks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWorkingBlock {
            block_id,
            tenant: tenant.to_string(),
            data: Vec::new(),
            live: Arc::clone(&self.live_working_blocks),
        }))
    }
}

struct MemoryWorkingBlock {
    block_id: Uuid,
    tenant: String,
    data: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl WorkingBlock for MemoryWorkingBlock {
    fn block_id(&self) -> Uuid {
        self.block_id
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, BackendError> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>, BackendError> {
        Ok(Box::new(Cursor::new(self.data.as_slice())))
    }

    fn clear(self: Box<Self>) -> Result<(), BackendError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
