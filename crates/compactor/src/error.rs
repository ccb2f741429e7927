//! Error taxonomy and the per-run ledger of durable effects.

use std::fmt;

use backend::BackendError;
use encoding::EncodingError;
use thiserror::Error;
use uuid::Uuid;

/// Why an input block could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("block belongs to tenant {found:?}, job is for {expected:?}")]
    TenantMismatch { expected: String, found: String },

    #[error("metadata names block {found}")]
    IdMismatch { found: Uuid },
}

/// Why an output block could not be written or shipped.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("id {id:?} written after {previous:?}")]
    OutOfOrder { id: Vec<u8>, previous: Vec<u8> },
}

/// A fatal compaction error. Every variant aborts the job.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The job itself is unusable (duplicate inputs, bad tenant name).
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Index or metadata of an input was unreadable or malformed. Nothing
    /// has been written yet, so the job is safe to retry.
    #[error("loading block {block_id} failed: {source}")]
    Load {
        block_id: Uuid,
        #[source]
        source: LoadError,
    },

    /// A ranged object read failed during the merge.
    #[error("reading objects of block {block_id} failed: {source}")]
    Read {
        block_id: Uuid,
        #[source]
        source: BackendError,
    },

    /// An input block is corrupt. Never treated as end of input.
    #[error("corrupt block {block_id}: {source}")]
    Decode {
        block_id: Uuid,
        #[source]
        source: EncodingError,
    },

    /// The merge loop reached a state its invariants rule out.
    #[error("merge invariant violated: {0}")]
    MergeInvariant(String),

    /// Appending to or shipping an output block failed.
    #[error("writing output block {block_id} failed: {source}")]
    Write {
        block_id: Uuid,
        #[source]
        source: WriteError,
    },

    #[error("compaction cancelled")]
    Cancelled,
}

/// Position of a job in the compaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Loading,
    Merging,
    Shipping,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Loading => "loading",
            JobState::Merging => "merging",
            JobState::Shipping => "shipping",
            JobState::Finalizing => "finalizing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A best-effort step that runs after data is already durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    ClearWorkingBlock(Uuid),
    MarkCompacted(Uuid),
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupAction::ClearWorkingBlock(id) => write!(f, "clear working block {}", id),
            CleanupAction::MarkCompacted(id) => write!(f, "mark block {} compacted", id),
        }
    }
}

#[derive(Debug, Error)]
#[error("{action}: {error}")]
pub struct CleanupFailure {
    pub action: CleanupAction,
    #[source]
    pub error: BackendError,
}

/// Outcomes of every cleanup action that failed during one run.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn record(&mut self, action: CleanupAction, error: BackendError) {
        self.failures.push(CleanupFailure { action, error });
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no cleanup failures");
        }
        write!(f, "{} cleanup failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

/// An output block that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippedBlock {
    pub block_id: Uuid,
    pub total_objects: u64,
    pub size: u64,
}

/// What one run has durably done so far.
///
/// Kept for the lifetime of the run and handed back on success and on
/// failure so a supervisor can reconcile a partially completed job.
#[derive(Debug, Default)]
pub struct JobLedger {
    pub state: JobState,
    pub inputs: Vec<Uuid>,
    pub shipped: Vec<ShippedBlock>,
    pub marked: Vec<Uuid>,
    pub cleanup: CleanupReport,
}

impl JobLedger {
    pub fn new(inputs: Vec<Uuid>) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    /// Inputs not (yet) marked compacted, in job order.
    #[must_use]
    pub fn unmarked_inputs(&self) -> Vec<Uuid> {
        self.inputs
            .iter()
            .filter(|id| !self.marked.contains(id))
            .copied()
            .collect()
    }

    /// True when output blocks exist while some inputs are still live, so
    /// their data is visible twice until reconciled.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.shipped.is_empty() && self.marked.len() < self.inputs.len()
    }
}

/// A failed job: the phase it failed in, the cause, and its ledger.
#[derive(Debug, Error)]
#[error("compaction for tenant {tenant} failed while {phase}: {error}")]
pub struct JobFailure {
    pub tenant: String,
    pub phase: JobState,
    #[source]
    pub error: CompactionError,
    pub ledger: JobLedger,
}

impl JobFailure {
    /// Whether output blocks were shipped before the failure.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.ledger.is_partial()
    }
}
