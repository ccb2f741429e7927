//! The compaction state machine.
//!
//! ```text
//! Loading ──> Merging <──> Shipping ──> Finalizing ──> Done
//!    │           │            │
//!    └───────────┴────────────┴──────> Failed
//! ```
//!
//! Loading reads every input's metadata and index and has no side effects.
//! Merging feeds merged pairs into the open output block; once the block
//! holds `records_per_block` records it is shipped, which is the first
//! durable effect of the run. After the merge the last partial block is
//! shipped and every input is marked compacted. Marking is best-effort:
//! failures are collected in the ledger and never abort the run.

use std::collections::HashSet;
use std::sync::Arc;

use backend::{
    validate_tenant, BlockMarker, BlockReader, BlockWriter, WorkingBlockAllocator,
};
use config::{CompactorConfig, ConfigError};
use encoding::{BlockMeta, IndexCursor, Record};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    records_per_block, Bookmark, CleanupAction, CompactionError, DuplicateResolver, JobFailure,
    JobLedger, JobState, LoadError, MergeDriver, MergeStats, OutputBlock, PreferLongest,
    ShippedBlock, WriteError,
};

/// A set of blocks of one tenant to merge into fresh blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionJob {
    pub tenant: String,
    pub block_ids: Vec<Uuid>,
}

impl CompactionJob {
    pub fn new(tenant: impl Into<String>, block_ids: Vec<Uuid>) -> Self {
        Self {
            tenant: tenant.into(),
            block_ids,
        }
    }
}

/// Counters for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sum of the inputs' `total_objects`.
    pub records_in: u64,
    pub records_per_block: u64,
    pub blocks_shipped: u64,
    pub merge: MergeStats,
}

/// Result of a successful run. Cleanup failures, if any, are in
/// `ledger.cleanup`.
#[derive(Debug)]
pub struct CompactionOutcome {
    pub tenant: String,
    pub ledger: JobLedger,
    pub stats: CompactionStats,
}

struct LoadedInput {
    meta: BlockMeta,
    records: Vec<Record>,
}

/// Merges blocks of one tenant into at most `output_blocks` new blocks.
///
/// The collaborators are shared trait objects so one compactor can serve
/// several jobs in parallel.
pub struct Compactor {
    reader: Arc<dyn BlockReader>,
    writer: Arc<dyn BlockWriter>,
    staging: Arc<dyn WorkingBlockAllocator>,
    marker: Arc<dyn BlockMarker>,
    resolver: Arc<dyn DuplicateResolver>,
    cfg: CompactorConfig,
}

impl Compactor {
    /// Creates a compactor using [`PreferLongest`] for duplicates.
    ///
    /// # Errors
    ///
    /// Returns the config's validation error.
    pub fn new(
        reader: Arc<dyn BlockReader>,
        writer: Arc<dyn BlockWriter>,
        staging: Arc<dyn WorkingBlockAllocator>,
        marker: Arc<dyn BlockMarker>,
        cfg: CompactorConfig,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            reader,
            writer,
            staging,
            marker,
            resolver: Arc::new(PreferLongest),
            cfg,
        })
    }

    /// Uses one backend for reading, writing and marking.
    pub fn from_backend<B>(
        backend: Arc<B>,
        staging: Arc<dyn WorkingBlockAllocator>,
        cfg: CompactorConfig,
    ) -> Result<Self, ConfigError>
    where
        B: BlockReader + BlockWriter + BlockMarker + 'static,
    {
        Self::new(backend.clone(), backend.clone(), staging, backend, cfg)
    }

    /// Replaces the duplicate resolution policy.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn DuplicateResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn config(&self) -> &CompactorConfig {
        &self.cfg
    }

    /// Runs one job to completion.
    ///
    /// `cancel` is checked between phases and once per merged record; it
    /// is no longer observed once inputs are being marked.
    ///
    /// # Errors
    ///
    /// Any fatal error returns a [`JobFailure`] naming the phase it occurred
    /// in together with the ledger of blocks already shipped.
    pub fn compact(
        &self,
        job: &CompactionJob,
        cancel: &CancellationToken,
    ) -> Result<CompactionOutcome, JobFailure> {
        let span = info_span!("compaction", tenant = %job.tenant, inputs = job.block_ids.len());
        let _enter = span.enter();

        let mut ledger = JobLedger::new(job.block_ids.clone());
        let mut stats = CompactionStats::default();

        match self.run(job, cancel, &mut ledger, &mut stats) {
            Ok(()) => {
                ledger.state = JobState::Done;
                info!(
                    shipped = ledger.shipped.len(),
                    marked = ledger.marked.len(),
                    records = stats.merge.records_out,
                    duplicates = stats.merge.duplicates_dropped,
                    cleanup_failures = ledger.cleanup.failures.len(),
                    "compaction complete"
                );
                Ok(CompactionOutcome {
                    tenant: job.tenant.clone(),
                    ledger,
                    stats,
                })
            }
            Err(error) => {
                let phase = ledger.state;
                ledger.state = JobState::Failed;
                error!(
                    %phase,
                    %error,
                    shipped = ledger.shipped.len(),
                    "compaction failed"
                );
                Err(JobFailure {
                    tenant: job.tenant.clone(),
                    phase,
                    error,
                    ledger,
                })
            }
        }
    }

    fn run(
        &self,
        job: &CompactionJob,
        cancel: &CancellationToken,
        ledger: &mut JobLedger,
        stats: &mut CompactionStats,
    ) -> Result<(), CompactionError> {
        validate_tenant(&job.tenant).map_err(|e| CompactionError::InvalidJob(e.to_string()))?;
        let mut seen = HashSet::new();
        for id in &job.block_ids {
            if !seen.insert(id) {
                return Err(CompactionError::InvalidJob(format!(
                    "block {} listed more than once",
                    id
                )));
            }
        }
        if job.block_ids.is_empty() {
            debug!("nothing to compact");
            return Ok(());
        }
        check_cancelled(cancel)?;

        // -------- Loading --------
        ledger.state = JobState::Loading;
        let inputs = job
            .block_ids
            .iter()
            .map(|&block_id| {
                self.load_input(block_id, &job.tenant)
                    .map_err(|source| CompactionError::Load { block_id, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_cancelled(cancel)?;

        stats.records_in = inputs.iter().map(|i| i.meta.total_objects).sum();
        stats.records_per_block = records_per_block(stats.records_in, self.cfg.output_blocks);
        debug!(
            records_in = stats.records_in,
            records_per_block = stats.records_per_block,
            "inputs loaded"
        );

        // -------- Merging / Shipping --------
        let metas: Vec<BlockMeta> = inputs.iter().map(|i| i.meta.clone()).collect();
        let bookmarks = job
            .block_ids
            .iter()
            .zip(inputs)
            .map(|(&block_id, input)| {
                Bookmark::new(
                    self.reader.as_ref(),
                    block_id,
                    &job.tenant,
                    input.records,
                    self.cfg.chunk_size_bytes,
                )
            })
            .collect();
        let mut driver = MergeDriver::new(bookmarks, self.resolver.as_ref());

        let mut current: Option<OutputBlock> = None;
        let merged = self.merge_and_ship(
            &mut driver,
            &mut current,
            &metas,
            &job.tenant,
            cancel,
            ledger,
            stats,
        );
        stats.merge = driver.stats();
        if let Err(e) = merged {
            if let Some(block) = current.take() {
                self.release(block, ledger);
            }
            return Err(e);
        }

        // -------- Finalizing --------
        ledger.state = JobState::Finalizing;
        for &block_id in &job.block_ids {
            match self.marker.mark_compacted(block_id, &job.tenant) {
                Ok(()) => ledger.marked.push(block_id),
                Err(e) => {
                    warn!(%block_id, error = %e, "failed to mark block compacted");
                    ledger
                        .cleanup
                        .record(CleanupAction::MarkCompacted(block_id), e);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_and_ship(
        &self,
        driver: &mut MergeDriver<'_>,
        current: &mut Option<OutputBlock>,
        metas: &[BlockMeta],
        tenant: &str,
        cancel: &CancellationToken,
        ledger: &mut JobLedger,
        stats: &mut CompactionStats,
    ) -> Result<(), CompactionError> {
        ledger.state = JobState::Merging;
        loop {
            check_cancelled(cancel)?;
            let Some((id, object)) = driver.next_record()? else {
                break;
            };

            if current.is_none() {
                *current = Some(self.open_block(metas, tenant, stats.records_per_block)?);
            }
            let Some(block) = current.as_mut() else {
                return Err(CompactionError::MergeInvariant(
                    "no open output block".to_string(),
                ));
            };
            block.write(&id, &object).map_err(|source| CompactionError::Write {
                block_id: block.block_id(),
                source,
            })?;

            if block.len() >= stats.records_per_block {
                if let Some(full) = current.take() {
                    ledger.state = JobState::Shipping;
                    self.ship(full, ledger, stats)?;
                    ledger.state = JobState::Merging;
                }
            }
        }

        if let Some(last) = current.take() {
            ledger.state = JobState::Shipping;
            self.ship(last, ledger, stats)?;
        }
        Ok(())
    }

    fn load_input(&self, block_id: Uuid, tenant: &str) -> Result<LoadedInput, LoadError> {
        let meta = BlockMeta::from_json(&self.reader.read_block_meta(block_id, tenant)?)?;
        if meta.tenant_id != tenant {
            return Err(LoadError::TenantMismatch {
                expected: tenant.to_string(),
                found: meta.tenant_id,
            });
        }
        if meta.block_id != block_id {
            return Err(LoadError::IdMismatch {
                found: meta.block_id,
            });
        }
        let records = IndexCursor::new(self.reader.read_index(block_id, tenant)?).collect_records()?;
        Ok(LoadedInput { meta, records })
    }

    fn open_block(
        &self,
        metas: &[BlockMeta],
        tenant: &str,
        expected_records: u64,
    ) -> Result<OutputBlock, CompactionError> {
        let block_id = Uuid::new_v4();
        let working = self
            .staging
            .new_working_block(block_id, tenant)
            .map_err(|e| CompactionError::Write {
                block_id,
                source: e.into(),
            })?;
        debug!(%block_id, "output block opened");
        Ok(OutputBlock::new(
            working,
            metas,
            expected_records,
            self.cfg.bloom_fp,
            self.cfg.index_downsample,
        ))
    }

    /// Writes `block` to the backend and releases its working block.
    fn ship(
        &self,
        mut block: OutputBlock,
        ledger: &mut JobLedger,
        stats: &mut CompactionStats,
    ) -> Result<(), CompactionError> {
        let block_id = block.block_id();
        if let Err(source) = self.write_block(&mut block) {
            self.release(block, ledger);
            return Err(CompactionError::Write { block_id, source });
        }

        let meta = block.meta();
        info!(
            %block_id,
            records = meta.total_objects,
            size = meta.size,
            "output block shipped"
        );
        ledger.shipped.push(ShippedBlock {
            block_id,
            total_objects: meta.total_objects,
            size: meta.size,
        });
        stats.blocks_shipped += 1;
        self.release(block, ledger);
        Ok(())
    }

    fn write_block(&self, block: &mut OutputBlock) -> Result<(), WriteError> {
        let block_id = block.block_id();
        let tenant = block.tenant().to_string();
        let meta = block.meta().to_json()?;
        let bloom = block.bloom();
        let index = block.index();
        let mut data = block.data()?;
        self.writer
            .write_block(block_id, &tenant, &meta, &bloom, &index, &mut data)?;
        Ok(())
    }

    /// Clears a working block, recording a failure instead of returning it.
    fn release(&self, block: OutputBlock, ledger: &mut JobLedger) {
        let block_id = block.block_id();
        if let Err(e) = block.clear() {
            warn!(%block_id, error = %e, "failed to clear working block");
            ledger
                .cleanup
                .record(CleanupAction::ClearWorkingBlock(block_id), e);
        }
    }
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor").field("cfg", &self.cfg).finish()
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), CompactionError> {
    if cancel.is_cancelled() {
        return Err(CompactionError::Cancelled);
    }
    Ok(())
}
