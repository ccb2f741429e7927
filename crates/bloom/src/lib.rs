//! # Bloom Filter
//!
//! Per-block membership filter shipped alongside every compacted block.
//!
//! A query for a trace id can skip a block outright when its filter answers
//! "definitely absent". False positives are possible, false negatives are
//! not. The false-positive target is a configuration value carried into the
//! block metadata, so every block records the rate it was built with.
//!
//! ## Serialized form
//!
//! ```text
//! [num_bits: u64 LE][num_hashes: u32 LE][bits_len: u32 LE][bits]
//! ```
//!
//! Building the same filter from the same ids always produces the same bytes,
//! which the compactor relies on for idempotent block finalization.
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"trace-1");
//! assert!(bf.may_contain(b"trace-1"));
//!
//! let restored = BloomFilter::from_bytes(&bf.to_bytes()).unwrap();
//! assert!(restored.may_contain(b"trace-1"));
//! ```

use thiserror::Error;

/// Upper bound on the bit vector accepted by [`BloomFilter::from_bytes`].
const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// Fixed header size of the serialized form.
const HEADER_BYTES: usize = 8 + 4 + 4;

/// Errors raised while decoding a serialized filter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BloomError {
    #[error("bloom filter truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bloom filter too large: {0} bytes")]
    TooLarge(usize),

    #[error("bloom filter header inconsistent: {num_bits} bits in {bits_len} bytes")]
    Inconsistent { num_bits: u64, bits_len: usize },
}

/// A bit-vector bloom filter using `k` hash functions derived by double
/// hashing two FNV-1a digests.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_items` at the given
    /// `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        // m = -n * ln(p) / ln(2)^2, k = (m / n) * ln(2)
        let n = expected_items as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let num_bits = num_bits.max(64);
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Builds a filter containing every id yielded by `ids`.
    pub fn from_ids<'a, I>(expected_items: usize, false_positive_rate: f64, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bf = Self::new(expected_items.max(1), false_positive_rate);
        for id in ids {
            bf.insert(id);
        }
        bf
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.bit_positions(key) {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns `false` only when `key` was never inserted.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bit_positions(key)
            .all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Size of [`to_bytes`](BloomFilter::to_bytes) output.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        HEADER_BYTES + self.bits.len()
    }

    /// Serializes the filter into its wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Decodes a filter previously produced by [`to_bytes`](BloomFilter::to_bytes).
    pub fn from_bytes(buf: &[u8]) -> Result<Self, BloomError> {
        if buf.len() < HEADER_BYTES {
            return Err(BloomError::Truncated {
                needed: HEADER_BYTES,
                available: buf.len(),
            });
        }

        let num_bits = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        let num_hashes = u32::from_le_bytes(buf[8..12].try_into().unwrap_or_default());
        let bits_len = u32::from_le_bytes(buf[12..16].try_into().unwrap_or_default()) as usize;

        if bits_len > MAX_BLOOM_BYTES {
            return Err(BloomError::TooLarge(bits_len));
        }
        if num_bits == 0 || num_bits.div_ceil(8) as usize != bits_len {
            return Err(BloomError::Inconsistent { num_bits, bits_len });
        }

        let body = &buf[HEADER_BYTES..];
        if body.len() < bits_len {
            return Err(BloomError::Truncated {
                needed: HEADER_BYTES + bits_len,
                available: buf.len(),
            });
        }

        Ok(Self {
            bits: body[..bits_len].to_vec(),
            num_bits,
            num_hashes,
        })
    }

    /// Yields the `num_hashes` bit positions for `key`: `(h1 + i * h2) mod m`.
    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u64> {
        let num_bits = self.num_bits;
        let h1 = fnv1a_64(key, 0xcbf2_9ce4_8422_2325);
        // An even h2 would revisit the same positions when m is a power of two.
        let h2 = fnv1a_64(key, 0x517c_c1b7_2722_0a95) | 1;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    data.iter()
        .fold(basis, |hash, &byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}
