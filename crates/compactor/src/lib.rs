//! # Compactor - block compaction for TraceKV
//!
//! Merges several sorted blocks of one tenant into fewer, larger blocks.
//!
//! ## Architecture
//!
//! ```text
//!   input blocks (backend)
//!     |  read_index / read_block_meta        (Loading)
//!     v
//!   Bookmark ... Bookmark                    chunked ranged reads
//!     \           /
//!      MergeDriver                           lowest id wins, duplicates resolved
//!          |
//!          v
//!      OutputBlock ──> working block (wal)   records_per_block records each
//!          |
//!          v
//!      write_block (backend)                 (Shipping)
//!          |
//!          v
//!      mark_compacted on every input         (Finalizing)
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                |
//! |----------------|--------------------------------------------------------|
//! | [`bookmark`]   | Cursor over one input with chunked object fetches      |
//! | [`merge`]      | K-way merge, [`DuplicateResolver`], output sizing      |
//! | [`block`]      | Output block accumulator (data, index, bloom, meta)    |
//! | [`compactor`]  | Job state machine and ledger of durable effects        |
//! | [`pool`]       | Parallel execution of independent jobs                 |
//! | [`error`]      | Error types, [`JobLedger`], [`CleanupReport`]          |
//!
//! ## Failure model
//!
//! Loading failures have no side effects. Once the first output block is
//! shipped a failure leaves durable output behind while the inputs stay
//! live; [`JobFailure::is_partial`] reports this and the ledger lists what
//! was shipped. Marking inputs compacted is best-effort.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use backend::LocalBackend;
//! use compactor::{CompactionJob, Compactor};
//! use config::CompactorConfig;
//! use tokio_util::sync::CancellationToken;
//! use wal::Wal;
//!
//! let backend = Arc::new(LocalBackend::open("data/blocks").unwrap());
//! let wal = Arc::new(Wal::open("data/wal", false).unwrap());
//! let compactor = Compactor::from_backend(backend, wal, CompactorConfig::default()).unwrap();
//!
//! let job = CompactionJob::new("acme", vec![]);
//! let outcome = compactor.compact(&job, &CancellationToken::new()).unwrap();
//! assert!(outcome.ledger.shipped.is_empty());
//! ```

pub mod block;
pub mod bookmark;
pub mod compactor;
pub mod error;
pub mod merge;
pub mod pool;

pub use block::OutputBlock;
pub use bookmark::{Bookmark, BookmarkStats};
pub use compactor::{CompactionJob, CompactionOutcome, CompactionStats, Compactor};
pub use error::{
    CleanupAction, CleanupFailure, CleanupReport, CompactionError, JobFailure, JobLedger,
    JobState, LoadError, ShippedBlock, WriteError,
};
pub use merge::{records_per_block, DuplicateResolver, MergeDriver, MergeStats, PreferLongest};
pub use pool::{CompactionPool, JobResult};

#[cfg(test)]
mod tests;
