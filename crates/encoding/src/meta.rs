//! Block metadata, stored as JSON next to every block.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EncodingError;

/// Current metadata layout version.
pub const META_FORMAT_VERSION: u32 = 1;

/// Descriptive metadata of one block.
///
/// `total_objects` is the authoritative object count; the index may hold
/// fewer records when it is downsampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub version: u32,
    pub block_id: Uuid,
    pub tenant_id: String,
    pub min_id: Vec<u8>,
    pub max_id: Vec<u8>,
    pub total_objects: u64,
    /// Size of the object store in bytes.
    pub size: u64,
    /// Unix millis of the oldest data in the block, 0 if unknown.
    pub start_time_ms: u64,
    /// Unix millis of the newest data in the block, 0 if unknown.
    pub end_time_ms: u64,
    /// 0 for ingested blocks, incremented on every compaction.
    pub compaction_level: u8,
    pub bloom_fp: f64,
    pub index_downsample: u32,
}

impl BlockMeta {
    pub fn new(block_id: Uuid, tenant_id: impl Into<String>) -> Self {
        Self {
            version: META_FORMAT_VERSION,
            block_id,
            tenant_id: tenant_id.into(),
            min_id: Vec::new(),
            max_id: Vec::new(),
            total_objects: 0,
            size: 0,
            start_time_ms: 0,
            end_time_ms: 0,
            compaction_level: 0,
            bloom_fp: 0.0,
            index_downsample: 1,
        }
    }

    /// Starts the metadata of a block produced by compacting `inputs`.
    ///
    /// The time range is the union of the inputs' ranges and the level is
    /// one above the highest input level. Id range and counts start empty
    /// and are filled by [`observe_object`](BlockMeta::observe_object).
    pub fn compacted_from(
        block_id: Uuid,
        tenant_id: impl Into<String>,
        inputs: &[BlockMeta],
        bloom_fp: f64,
        index_downsample: u32,
    ) -> Self {
        let mut meta = Self::new(block_id, tenant_id);
        meta.bloom_fp = bloom_fp;
        meta.index_downsample = index_downsample;
        meta.compaction_level = inputs
            .iter()
            .map(|m| m.compaction_level)
            .max()
            .map_or(1, |lvl| lvl.saturating_add(1));

        let timed = inputs.iter().filter(|m| m.start_time_ms != 0 || m.end_time_ms != 0);
        meta.start_time_ms = timed.clone().map(|m| m.start_time_ms).min().unwrap_or(0);
        meta.end_time_ms = timed.map(|m| m.end_time_ms).max().unwrap_or(0);
        meta
    }

    /// Folds one appended object into the id range and counters.
    pub fn observe_object(&mut self, id: &[u8], encoded_len: u64) {
        if self.total_objects == 0 || id < self.min_id.as_slice() {
            self.min_id = id.to_vec();
        }
        if self.total_objects == 0 || id > self.max_id.as_slice() {
            self.max_id = id.to_vec();
        }
        self.total_objects += 1;
        self.size += encoded_len;
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(buf: &[u8]) -> Result<Self, EncodingError> {
        Ok(serde_json::from_slice(buf)?)
    }
}
