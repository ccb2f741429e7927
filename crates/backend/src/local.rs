//! Directory-tree block storage.
//!
//! ```text
//! <root>/
//! └── <tenant>/
//!     ├── <block_id>/
//!     │   ├── meta.json            (meta.compacted.json once compacted)
//!     │   ├── index
//!     │   ├── bloom
//!     │   └── data
//!     └── .<block_id>.tmp/         (in-flight write, ignored by listings)
//! ```
//!
//! A block is written into a hidden temp directory, every file is fsynced,
//! and the directory is renamed into place. A crash mid-write leaves only a
//! hidden temp directory behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::{
    validate_tenant, BackendError, BlockMarker, BlockReader, BlockWriter, BLOOM_FILENAME,
    COMPACTED_META_FILENAME, DATA_FILENAME, INDEX_FILENAME, META_FILENAME,
};

/// Block storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Opens (creating if needed) a backend rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, BackendError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf, BackendError> {
        validate_tenant(tenant)?;
        Ok(self.root.join(tenant))
    }

    fn block_dir(&self, block_id: Uuid, tenant: &str) -> Result<PathBuf, BackendError> {
        Ok(self.tenant_dir(tenant)?.join(block_id.to_string()))
    }

    fn read_block_file(
        &self,
        block_id: Uuid,
        tenant: &str,
        name: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let path = self.block_dir(block_id, tenant)?.join(name);
        fs::read(&path).map_err(|e| not_found_or_io(e, block_id, tenant))
    }
}

impl BlockReader for LocalBackend {
    fn read_index(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        self.read_block_file(block_id, tenant, INDEX_FILENAME)
    }

    fn read_block_meta(&self, block_id: Uuid, tenant: &str) -> Result<Vec<u8>, BackendError> {
        match self.read_block_file(block_id, tenant, META_FILENAME) {
            Err(BackendError::NotFound { .. }) => {
                self.read_block_file(block_id, tenant, COMPACTED_META_FILENAME)
            }
            other => other,
        }
    }

    fn read_object_range(
        &self,
        block_id: Uuid,
        tenant: &str,
        start: u64,
        length: u32,
    ) -> Result<Vec<u8>, BackendError> {
        let path = self.block_dir(block_id, tenant)?.join(DATA_FILENAME);
        let mut f = File::open(&path).map_err(|e| not_found_or_io(e, block_id, tenant))?;

        let size = f.metadata()?.len();
        match start.checked_add(u64::from(length)) {
            Some(end) if end <= size => {}
            end => {
                return Err(BackendError::OutOfRange {
                    block_id,
                    start,
                    end: end.unwrap_or(u64::MAX),
                    size,
                })
            }
        }

        f.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; length as usize];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn tenants(&self) -> Result<Vec<String>, BackendError> {
        let mut tenants: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| validate_tenant(name).is_ok())
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    fn blocks(&self, tenant: &str) -> Result<Vec<Uuid>, BackendError> {
        let dir = self.tenant_dir(tenant)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<Uuid> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(META_FILENAME).is_file())
            .filter_map(|e| e.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl BlockWriter for LocalBackend {
    fn write_block(
        &self,
        block_id: Uuid,
        tenant: &str,
        meta: &[u8],
        bloom: &[u8],
        index: &[u8],
        data: &mut dyn Read,
    ) -> Result<(), BackendError> {
        let tenant_dir = self.tenant_dir(tenant)?;
        let final_dir = tenant_dir.join(block_id.to_string());
        if final_dir.exists() {
            return Err(BackendError::AlreadyExists {
                block_id,
                tenant: tenant.to_string(),
            });
        }

        let tmp_dir = tenant_dir.join(format!(".{}.tmp", block_id));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let written = stage_block(&tmp_dir, meta, bloom, index, data);

        let data_bytes = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_dir_all(&tmp_dir);
                return Err(e.into());
            }
        };

        fs::rename(&tmp_dir, &final_dir)?;
        sync_dir(&tenant_dir);

        debug!(%block_id, tenant, data_bytes, "block written");
        Ok(())
    }
}

impl BlockMarker for LocalBackend {
    fn mark_compacted(&self, block_id: Uuid, tenant: &str) -> Result<(), BackendError> {
        let dir = self.block_dir(block_id, tenant)?;
        let live = dir.join(META_FILENAME);
        let compacted = dir.join(COMPACTED_META_FILENAME);

        if compacted.exists() && !live.exists() {
            return Ok(());
        }
        fs::rename(&live, &compacted).map_err(|e| not_found_or_io(e, block_id, tenant))?;
        sync_dir(&dir);

        debug!(%block_id, tenant, "block marked compacted");
        Ok(())
    }
}

/// Writes every block file into `dir` and fsyncs them. Returns the number of
/// data bytes copied.
fn stage_block(
    dir: &Path,
    meta: &[u8],
    bloom: &[u8],
    index: &[u8],
    data: &mut dyn Read,
) -> io::Result<u64> {
    write_synced(&dir.join(INDEX_FILENAME), index)?;
    write_synced(&dir.join(BLOOM_FILENAME), bloom)?;

    let data_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(dir.join(DATA_FILENAME))?;
    let mut w = BufWriter::new(data_file);
    let copied = io::copy(data, &mut w)?;
    w.flush()?;
    w.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    // meta.json last: a block directory is only listed once it has one.
    write_synced(&dir.join(META_FILENAME), meta)?;
    sync_dir(dir);
    Ok(copied)
}

fn not_found_or_io(e: io::Error, block_id: Uuid, tenant: &str) -> BackendError {
    if e.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound {
            block_id,
            tenant: tenant.to_string(),
        }
    } else {
        BackendError::Io(e)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut f = OpenOptions::new().create_new(true).write(true).open(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}

/// Best-effort directory fsync so renames survive a crash. No-op where
/// directories cannot be opened (Windows).
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
