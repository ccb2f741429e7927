//! # CLI - TraceKV compaction shell
//!
//! A REPL over a local block store. Reads commands from stdin, runs them
//! against the backend and prints results to stdout, so it works both
//! interactively and with piped scripts. Logs go to stderr.
//!
//! ## Commands
//!
//! ```text
//! TENANTS                         List tenants with blocks
//! BLOCKS tenant                   List a tenant's live blocks
//! COMPACT tenant [block_id ...]   Compact the given blocks, or the oldest
//!                                 TRACEKV_INPUT_BLOCKS blocks if none given
//! COMPACT *                       Compact every tenant, jobs in parallel
//! WORKING                         List working blocks left in the WAL dir
//! EXIT / QUIT                     Shut down
//! ```
//!
//! ## Configuration
//!
//! ```text
//! TRACEKV_BACKEND_DIR      block store root          (default: "data/blocks")
//! TRACEKV_WAL_DIR          working block directory   (default: "data/wal")
//! TRACEKV_WAL_SYNC         fsync every append        (default: false)
//! TRACEKV_BLOOM_FP         bloom false-positive rate (default: 0.05)
//! TRACEKV_INDEX_DOWNSAMPLE objects per index record  (default: 10)
//! TRACEKV_OUTPUT_BLOCKS    output blocks per job     (default: 2)
//! TRACEKV_INPUT_BLOCKS     blocks picked per job     (default: 4)
//! TRACEKV_CHUNK_BYTES      merge read chunk size     (default: 10 MiB)
//! TRACEKV_MAX_JOBS         parallel jobs             (default: 1)
//! RUST_LOG                 log filter                (default: "info")
//! ```

mod shell;
#[cfg(test)]
mod tests;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use backend::LocalBackend;
use compactor::{CompactionPool, Compactor};
use config::{CompactorConfig, StorageConfig};
use shell::Shell;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wal::Wal;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cfg = CompactorConfig::from_env()?;
    let storage = StorageConfig::from_env()?;

    let backend = Arc::new(LocalBackend::open(&storage.backend_dir)?);
    let wal = Arc::new(Wal::open(&storage.wal_dir, storage.wal_sync)?);
    let leftovers = wal.working_blocks()?;
    if !leftovers.is_empty() {
        warn!(count = leftovers.len(), dir = %wal.dir().display(), "working blocks left from an earlier run");
    }

    println!(
        "TraceKV compactor started (blocks={}, wal={}, outputs={}, inputs={}, jobs={})",
        storage.backend_dir.display(),
        storage.wal_dir.display(),
        cfg.output_blocks,
        cfg.input_blocks,
        cfg.max_concurrent_jobs
    );
    println!("Commands: TENANTS | BLOCKS tenant | COMPACT tenant [block_id ...] | COMPACT *");
    println!("          WORKING | EXIT");

    let compactor = Compactor::from_backend(backend.clone(), wal.clone(), cfg)?;
    let mut shell = Shell::new(backend, wal, CompactionPool::new(compactor));

    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let keep_going = shell.execute(&line, &mut io::stdout().lock())?;
        if !keep_going {
            break;
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
