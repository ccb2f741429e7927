//! # Config - TraceKV compaction settings
//!
//! Plain settings structs shared by the compactor and the CLI. Nothing here
//! touches the filesystem; the values are passed through to the components
//! that use them.
//!
//! ## Environment variables
//!
//! ```text
//! TRACEKV_BLOOM_FP            bloom false-positive target   (default: 0.05)
//! TRACEKV_INDEX_DOWNSAMPLE    objects per index record      (default: 10)
//! TRACEKV_OUTPUT_BLOCKS       output blocks per job         (default: 2)
//! TRACEKV_INPUT_BLOCKS        inputs picked per CLI job     (default: 4)
//! TRACEKV_CHUNK_BYTES         merge read chunk size         (default: 10 MiB)
//! TRACEKV_MAX_JOBS            concurrent compaction jobs    (default: 1)
//! TRACEKV_BACKEND_DIR         block storage root            (default: "data/blocks")
//! TRACEKV_WAL_DIR             working block directory       (default: "data/wal")
//! TRACEKV_WAL_SYNC            fsync working block appends   (default: "false")
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Default merge read chunk: 10 MiB.
pub const DEFAULT_CHUNK_SIZE_BYTES: u32 = 10 * 1024 * 1024;

/// Errors raised while building or validating configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Parse { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Tuning knobs for a compaction run.
///
/// `bloom_fp` and `index_downsample` shape every output block; the core
/// never derives them from the input blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactorConfig {
    /// Target false-positive rate of each output block's bloom filter.
    pub bloom_fp: f64,
    /// Number of objects covered by one index record.
    pub index_downsample: usize,
    /// Number of output blocks a job aims to produce.
    pub output_blocks: usize,
    /// Number of inputs the CLI selects when no ids are given.
    pub input_blocks: usize,
    /// Accumulated object bytes that trigger a ranged read per input.
    pub chunk_size_bytes: u32,
    /// Upper bound on jobs running in parallel.
    pub max_concurrent_jobs: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            bloom_fp: 0.05,
            index_downsample: 10,
            output_blocks: 2,
            input_blocks: 4,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_concurrent_jobs: 1,
        }
    }
}

impl CompactorConfig {
    pub fn with_bloom_fp(mut self, fp: f64) -> Self {
        self.bloom_fp = fp;
        self
    }

    pub fn with_index_downsample(mut self, downsample: usize) -> Self {
        self.index_downsample = downsample;
        self
    }

    pub fn with_output_blocks(mut self, blocks: usize) -> Self {
        self.output_blocks = blocks;
        self
    }

    pub fn with_input_blocks(mut self, blocks: usize) -> Self {
        self.input_blocks = blocks;
        self
    }

    pub fn with_chunk_size_bytes(mut self, bytes: u32) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    /// Checks that every value is usable by the compactor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bloom_fp > 0.0 && self.bloom_fp < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "bloom_fp must be in (0, 1), got {}",
                self.bloom_fp
            )));
        }
        if self.index_downsample == 0 {
            return Err(ConfigError::Invalid("index_downsample must be > 0".into()));
        }
        if self.output_blocks == 0 {
            return Err(ConfigError::Invalid("output_blocks must be > 0".into()));
        }
        if self.input_blocks == 0 {
            return Err(ConfigError::Invalid("input_blocks must be > 0".into()));
        }
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid("chunk_size_bytes must be > 0".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_jobs must be > 0".into()));
        }
        Ok(())
    }

    /// Reads `TRACEKV_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, falling back to the
    /// defaults for missing keys. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let cfg = Self {
            bloom_fp: parse_or(&lookup, "TRACEKV_BLOOM_FP", d.bloom_fp)?,
            index_downsample: parse_or(&lookup, "TRACEKV_INDEX_DOWNSAMPLE", d.index_downsample)?,
            output_blocks: parse_or(&lookup, "TRACEKV_OUTPUT_BLOCKS", d.output_blocks)?,
            input_blocks: parse_or(&lookup, "TRACEKV_INPUT_BLOCKS", d.input_blocks)?,
            chunk_size_bytes: parse_or(&lookup, "TRACEKV_CHUNK_BYTES", d.chunk_size_bytes)?,
            max_concurrent_jobs: parse_or(&lookup, "TRACEKV_MAX_JOBS", d.max_concurrent_jobs)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Where blocks and working blocks live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend_dir: PathBuf,
    pub wal_dir: PathBuf,
    /// If `true`, every working block append is followed by `fsync`.
    pub wal_sync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend_dir: PathBuf::from("data/blocks"),
            wal_dir: PathBuf::from("data/wal"),
            wal_sync: false,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        Ok(Self {
            backend_dir: lookup("TRACEKV_BACKEND_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.backend_dir),
            wal_dir: lookup("TRACEKV_WAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.wal_dir),
            wal_sync: parse_or(&lookup, "TRACEKV_WAL_SYNC", d.wal_sync)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Parse { key, value: raw }),
    }
}
