//! # Encoding - TraceKV block formats
//!
//! Byte layouts shared by every component that reads or writes a block.
//!
//! A sealed block is four independent artifacts stored by the backend:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ DATA (object store, sorted ascending by id)                   │
//! │                                                              │
//! │ frame_len (u32) | crc32 (u32) | id_len (u32) | id | object    │
//! │                                                              │
//! │ frame_len counts everything after itself. The CRC32 covers    │
//! │ id_len through the end of the object.                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ INDEX (one record per `index_downsample` objects)             │
//! │                                                              │
//! │ id_len (u32) | id | start (u64) | length (u32)                │
//! │                                                              │
//! │ id is the largest id of the group, start/length the byte      │
//! │ range of the whole group inside DATA.                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ BLOOM (see the `bloom` crate)                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ META (JSON, see [`BlockMeta`])                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

mod format;
mod index;
mod meta;

pub use format::{
    decode_object, encode_object, encoded_len, DecodedObject, ObjectReader, FRAME_HEADER_BYTES,
    MAX_ID_BYTES, MAX_OBJECT_BYTES,
};
pub use index::{IndexCursor, IndexWriter, Record};
pub use meta::{BlockMeta, META_FORMAT_VERSION};

use thiserror::Error;

/// Errors raised while encoding or decoding block artifacts.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ended before a complete frame or record.
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    /// Framing fields are self-inconsistent or out of bounds.
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    /// The stored checksum does not match the frame contents.
    #[error("crc32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("block meta: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests;
