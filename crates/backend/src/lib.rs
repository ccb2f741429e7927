//! # Backend - block storage collaborators
//!
//! The compactor never touches storage directly. It talks to four narrow
//! traits defined here:
//!
//! | Trait                     | Used for                                        |
//! |---------------------------|-------------------------------------------------|
//! | [`BlockReader`]           | index, metadata, and ranged object reads        |
//! | [`BlockWriter`]           | shipping a finished block                       |
//! | [`BlockMarker`]           | marking an input block compacted                |
//! | [`WorkingBlockAllocator`] | staging a new block while it is being written   |
//!
//! All calls are blocking. Implementations must be safe to share between
//! threads; the compactor adds no locking of its own.
//!
//! Two implementations ship with the crate: [`LocalBackend`] stores blocks
//! in a directory tree, [`MemoryBackend`] keeps everything in process and is
//! meant for tests.

mod local;
mod memory;

pub use local::LocalBackend;
pub use memory::{MemoryBackend, StoredBlock};

use std::io::{self, Read};
use thiserror::Error;
use uuid::Uuid;

/// Name of the live metadata file inside a block directory.
pub const META_FILENAME: &str = "meta.json";
/// Name the metadata file is renamed to once the block is compacted.
pub const COMPACTED_META_FILENAME: &str = "meta.compacted.json";
pub const INDEX_FILENAME: &str = "index";
pub const BLOOM_FILENAME: &str = "bloom";
pub const DATA_FILENAME: &str = "data";

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("block {block_id} not found for tenant {tenant}")]
    NotFound { block_id: Uuid, tenant: String },

    #[error("block {block_id} already exists for tenant {tenant}")]
    AlreadyExists { block_id: Uuid, tenant: String },

    #[error("range [{start}, {end}) outside block {block_id} of {size} bytes")]
    OutOfRange {
        block_id: Uuid,
        start: u64,
        end: u64,
        size: u64,
    },

    #[error("invalid tenant name {0:?}")]
    InvalidTenant(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Read side of block storage.
pub trait BlockReader: Send + Sync {
    fn read_index(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError>;

    /// Metadata bytes of a block. Compacted blocks stay readable.
    fn read_block_meta(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError>;

    /// Reads exactly `length` bytes of the object store starting at `start`.
    fn read_object_range(
        &self,
        block_id: Uuid,
        tenant: &str,
        start: u64,
        length: u32,
    ) -> Result<Vec<u8>, BackendError>;

    /// Tenants that own at least one block, sorted.
    fn tenants(&self) -> Result<Vec<String>, BackendError>;

    /// Ids of the tenant's blocks that are not marked compacted, sorted.
    fn blocks(&self, tenant: &str) -> Result<Vec<Uuid>, BackendError>;
}

/// Write side of block storage.
pub trait BlockWriter: Send + Sync {
    /// Durably stores a complete block. Once this returns `Ok` the block is
    /// visible to [`BlockReader::blocks`].
    fn write_block(
        &self,
        block_id: Uuid,
        tenant: &str,
        meta: &[u8],
        bloom: &[u8],
        index: &[u8],
        data: &mut dyn Read,
    ) -> Result<(), BackendError>;
}

/// Marks blocks as superseded so listings skip them.
pub trait BlockMarker: Send + Sync {
    /// Idempotent: marking an already-compacted block succeeds.
    fn mark_compacted(&self, block_id: Uuid, tenant: &str) -> Result<(), BackendError>;
}

/// Allocates append-only staging storage for blocks under construction.
pub trait WorkingBlockAllocator: Send + Sync {
    fn new_working_block(
        &self,
        block_id: Uuid,
        tenant: &str,
    ) -> Result<Box<dyn WorkingBlock>, BackendError>;
}

/// Append-only staging storage for one block.
pub trait WorkingBlock: Send {
    fn block_id(&self) -> Uuid;

    fn tenant(&self) -> &str;

    /// Appends `bytes` and returns the offset they were written at.
    fn append(&mut self, bytes: &[u8]) -> Result<u64, BackendError>;

    /// Total bytes appended so far.
    fn size(&self) -> u64;

    /// Reads back everything appended so far, from offset 0.
    fn data(&mut self) -> Result<Box<dyn Read + '_>, BackendError>;

    /// Releases the staging storage.
    fn clear(self: Box<Self>) -> Result<(), BackendError>;
}

/// Rejects tenant names that would escape a directory layout.
pub fn validate_tenant(tenant: &str) -> Result<(), BackendError> {
    let bad = tenant.is_empty()
        || tenant.starts_with('.')
        || tenant.contains(['/', '\\', ':', '\0']);
    if bad {
        return Err(BackendError::InvalidTenant(tenant.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
