//! # WAL - working block staging
//!
//! Blocks under construction are appended to files in a WAL directory before
//! they are shipped to the backend. Each working block is one append-only
//! file named after its block id and tenant:
//!
//! ```text
//! <wal_dir>/<block_id>:<tenant>
//! ```
//!
//! The compactor writes framed objects into a working block, reads the file
//! back when shipping it, and clears it afterwards. A file that outlives its
//! run (crash, failed job) is visible through [`Wal::working_blocks`] so an
//! operator or a follow-up job can clean it up.
//!
//! ## Example
//!
//! ```rust,no_run
//! use backend::WorkingBlock;
//! use uuid::Uuid;
//! use wal::Wal;
//!
//! let wal = Wal::open("data/wal", false).unwrap();
//! let mut block = wal.create(Uuid::new_v4(), "acme").unwrap();
//! let offset = block.append(b"framed object bytes").unwrap();
//! assert_eq!(offset, 0);
//! Box::new(block).clear().unwrap();
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use backend::{validate_tenant, BackendError, WorkingBlock, WorkingBlockAllocator};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors raised by the staging area.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("working block {0} already exists")]
    Exists(PathBuf),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<WalError> for BackendError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => BackendError::Io(io),
            WalError::Backend(b) => b,
            other => BackendError::Other(other.to_string()),
        }
    }
}

/// Directory holding working block files.
#[derive(Debug, Clone)]
pub struct Wal {
    dir: PathBuf,
    sync: bool,
}

impl Wal {
    /// Opens (or creates) the staging directory.
    ///
    /// When `sync` is true every append is followed by `fsync`.
    pub fn open<P: AsRef<Path>>(dir: P, sync: bool) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, sync })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates an empty working block file.
    pub fn create(&self, block_id: Uuid, tenant: &str) -> Result<FileWorkingBlock, WalError> {
        validate_tenant(tenant)?;
        let path = self.dir.join(format!("{}:{}", block_id, tenant));
        let file = match OpenOptions::new().create_new(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WalError::Exists(path))
            }
            Err(e) => return Err(e.into()),
        };

        debug!(%block_id, tenant, path = %path.display(), "working block created");
        Ok(FileWorkingBlock {
            block_id,
            tenant: tenant.to_string(),
            path,
            writer: BufWriter::new(file),
            size: 0,
            sync: self.sync,
        })
    }

    /// Lists `(block_id, tenant)` for every working block file on disk.
    ///
    /// Files whose names do not parse are skipped.
    pub fn working_blocks(&self) -> Result<Vec<(Uuid, String)>, WalError> {
        let mut found: Vec<(Uuid, String)> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let (id, tenant) = name.split_once(':')?;
                let id = Uuid::parse_str(id).ok()?;
                Some((id, tenant.to_string()))
            })
            .collect();
        found.sort();
        Ok(found)
    }
}

impl WorkingBlockAllocator for Wal {
    fn new_working_block(
        &self,
        block_id: Uuid,
        tenant: &str,
    ) -> Result<Box<dyn WorkingBlock>, BackendError> {
        Ok(Box::new(self.create(block_id, tenant)?))
    }
}

/// A working block backed by one append-only file.
pub struct FileWorkingBlock {
    block_id: Uuid,
    tenant: String,
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
    sync: bool,
}

impl FileWorkingBlock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        if self.sync {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileWorkingBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWorkingBlock")
            .field("block_id", &self.block_id)
            .field("tenant", &self.tenant)
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

impl WorkingBlock for FileWorkingBlock {
    fn block_id(&self) -> Uuid {
        self.block_id
    }

    fn tenant(&self) -> &str {
        &self.tenant
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, BackendError> {
        let offset = self.size;
        self.writer.write_all(bytes).map_err(WalError::from)?;
        if self.sync {
            self.flush()?;
        }
        self.size += bytes.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn data(&mut self) -> Result<Box<dyn Read + '_>, BackendError> {
        self.flush()?;
        let f = File::open(&self.path).map_err(WalError::from)?;
        Ok(Box::new(BufReader::new(f).take(self.size)))
    }

    fn clear(self: Box<Self>) -> Result<(), BackendError> {
        let FileWorkingBlock { path, writer, .. } = *self;
        drop(writer);
        fs::remove_file(&path).map_err(WalError::from)?;
        debug!(path = %path.display(), "working block cleared");
        Ok(())
    }
}
