//! K-way merge over [`Bookmark`]s.
//!
//! Produces `(id, object)` pairs in ascending byte-wise id order. When the
//! same id is current in more than one input, a [`DuplicateResolver`] picks
//! the surviving object and every input holding that id is advanced.

use crate::{Bookmark, BookmarkStats, CompactionError};

/// Picks the surviving object among inputs that share an id.
///
/// `candidates` are ordered by input position in the job. The returned
/// index must be in range.
pub trait DuplicateResolver: Send + Sync {
    fn choose(&self, id: &[u8], candidates: &[&[u8]]) -> usize;
}

impl<F> DuplicateResolver for F
where
    F: Fn(&[u8], &[&[u8]]) -> usize + Send + Sync,
{
    fn choose(&self, id: &[u8], candidates: &[&[u8]]) -> usize {
        self(id, candidates)
    }
}

/// Keeps the longest object, assuming a longer trace is a more complete one.
/// Ties go to the earliest input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferLongest;

impl DuplicateResolver for PreferLongest {
    fn choose(&self, _id: &[u8], candidates: &[&[u8]]) -> usize {
        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate().skip(1) {
            if candidate.len() > candidates[best].len() {
                best = i;
            }
        }
        best
    }
}

/// Number of records each output block receives so that `output_blocks`
/// blocks always cover `total_records`.
#[must_use]
pub fn records_per_block(total_records: u64, output_blocks: usize) -> u64 {
    total_records / output_blocks.max(1) as u64 + 1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Pairs yielded.
    pub records_out: u64,
    /// Objects dropped because another input held the same id.
    pub duplicates_dropped: u64,
    pub input: BookmarkStats,
}

pub struct MergeDriver<'a> {
    bookmarks: Vec<Bookmark<'a>>,
    resolver: &'a dyn DuplicateResolver,
    last_id: Option<Vec<u8>>,
    records_out: u64,
    duplicates_dropped: u64,
}

impl<'a> MergeDriver<'a> {
    pub fn new(bookmarks: Vec<Bookmark<'a>>, resolver: &'a dyn DuplicateResolver) -> Self {
        Self {
            bookmarks,
            resolver,
            last_id: None,
            records_out: 0,
            duplicates_dropped: 0,
        }
    }

    /// True once every input is exhausted.
    #[must_use]
    pub fn done(&self) -> bool {
        self.bookmarks.iter().all(Bookmark::done)
    }

    /// Returns the next merged pair, or `None` when all inputs are done.
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, CompactionError> {
        for bookmark in &mut self.bookmarks {
            bookmark.load_current()?;
        }

        let mut lowest: Option<&[u8]> = None;
        for bookmark in &self.bookmarks {
            if let Some((id, _)) = bookmark.current() {
                if lowest.map_or(true, |low| id < low) {
                    lowest = Some(id);
                }
            }
        }

        let Some(lowest) = lowest else {
            if self.done() {
                return Ok(None);
            }
            return Err(CompactionError::MergeInvariant(
                "no candidate while inputs remain".to_string(),
            ));
        };

        let holders: Vec<usize> = self
            .bookmarks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.current().is_some_and(|(id, _)| id == lowest))
            .map(|(i, _)| i)
            .collect();
        let candidates: Vec<&[u8]> = holders
            .iter()
            .filter_map(|&i| self.bookmarks[i].current().map(|(_, obj)| obj))
            .collect();

        let choice = self.resolver.choose(lowest, &candidates);
        let Some(&winner) = holders.get(choice) else {
            return Err(CompactionError::MergeInvariant(format!(
                "resolver chose candidate {} of {}",
                choice,
                holders.len()
            )));
        };

        for &i in &holders {
            if i != winner {
                self.bookmarks[i].advance();
            }
        }
        let Some((id, object)) = self.bookmarks[winner].take_current() else {
            return Err(CompactionError::MergeInvariant(
                "winning input lost its current pair".to_string(),
            ));
        };

        if let Some(prev) = &self.last_id {
            if id <= *prev {
                return Err(CompactionError::MergeInvariant(format!(
                    "id {:?} emitted after {:?}",
                    id, prev
                )));
            }
        }
        self.last_id = Some(id.clone());
        self.records_out += 1;
        self.duplicates_dropped += holders.len() as u64 - 1;

        Ok(Some((id, object)))
    }

    #[must_use]
    pub fn stats(&self) -> MergeStats {
        let mut input = BookmarkStats::default();
        for bookmark in &self.bookmarks {
            input.absorb(bookmark.stats());
        }
        MergeStats {
            records_out: self.records_out,
            duplicates_dropped: self.duplicates_dropped,
            input,
        }
    }
}
