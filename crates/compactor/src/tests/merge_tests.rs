use super::helpers::*;
use crate::*;
use anyhow::Result;
use backend::MemoryBackend;
use proptest::prelude::*;
use std::collections::BTreeMap;
use uuid::Uuid;

fn bookmarks<'a>(
    backend: &'a MemoryBackend,
    blocks: &[Uuid],
    chunk_size: u32,
) -> Result<Vec<Bookmark<'a>>> {
    blocks
        .iter()
        .map(|&b| Ok(Bookmark::new(backend, b, TENANT, index_records(backend, b)?, chunk_size)))
        .collect()
}

fn merge_all(
    backend: &MemoryBackend,
    blocks: &[Uuid],
    chunk_size: u32,
    resolver: &dyn DuplicateResolver,
) -> Result<(Pairs, MergeStats)> {
    let mut driver = MergeDriver::new(bookmarks(backend, blocks, chunk_size)?, resolver);
    let mut out = Vec::new();
    while let Some(pair) = driver.next_record()? {
        out.push(pair);
    }
    assert!(driver.done());
    Ok((out, driver.stats()))
}

// -------------------- Ordering & duplicates --------------------

#[test]
fn interleaves_and_keeps_longer_duplicate() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &pairs(&[(1, "x"), (3, "y")]))?;
    let b = put_block(&backend, &pairs(&[(2, "z"), (3, "yy")]))?;

    let (out, stats) = merge_all(&backend, &[a, b], 1024, &PreferLongest)?;
    assert_eq!(out, pairs(&[(1, "x"), (2, "z"), (3, "yy")]));
    assert_eq!(stats.records_out, 3);
    assert_eq!(stats.duplicates_dropped, 1);
    Ok(())
}

#[test]
fn equal_length_duplicate_goes_to_earlier_input() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &pairs(&[(5, "aa")]))?;
    let b = put_block(&backend, &pairs(&[(5, "bb")]))?;
    let c = put_block(&backend, &pairs(&[(5, "cc")]))?;

    let (out, _) = merge_all(&backend, &[b, a, c], 1024, &PreferLongest)?;
    assert_eq!(out, pairs(&[(5, "bb")]));
    Ok(())
}

#[test]
fn closure_resolver_is_accepted() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &pairs(&[(1, "long"), (2, "a")]))?;
    let b = put_block(&backend, &pairs(&[(1, "s")]))?;

    let last = |_: &[u8], candidates: &[&[u8]]| candidates.len() - 1;
    let (out, _) = merge_all(&backend, &[a, b], 1024, &last)?;
    assert_eq!(out, pairs(&[(1, "s"), (2, "a")]));
    Ok(())
}

#[test]
fn out_of_range_choice_is_merge_invariant() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &pairs(&[(1, "a")]))?;

    let bogus = |_: &[u8], candidates: &[&[u8]]| candidates.len();
    let mut driver = MergeDriver::new(bookmarks(&backend, &[a], 1024)?, &bogus);
    assert!(matches!(
        driver.next_record(),
        Err(CompactionError::MergeInvariant(_))
    ));
    Ok(())
}

#[test]
fn empty_inputs_yield_nothing() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &Vec::new())?;
    let b = put_block(&backend, &Vec::new())?;
    let (out, stats) = merge_all(&backend, &[a, b], 1024, &PreferLongest)?;
    assert!(out.is_empty());
    assert_eq!(stats.input.chunks_fetched, 0);
    Ok(())
}

#[test]
fn corrupt_input_stops_the_merge() -> Result<()> {
    let backend = MemoryBackend::new();
    let a = put_block(&backend, &pairs(&[(1, "a"), (2, "b")]))?;
    let mut raw = frame_block(Uuid::new_v4(), TENANT, &pairs(&[(3, "c")]), 1);
    raw.data[5] ^= 0x01;
    let b = put_raw(&backend, &raw)?;

    let mut driver = MergeDriver::new(bookmarks(&backend, &[a, b], 1024)?, &PreferLongest);
    assert!(matches!(
        driver.next_record(),
        Err(CompactionError::Decode { block_id, .. }) if block_id == b
    ));
    Ok(())
}

// -------------------- Policy & sizing --------------------

#[test]
fn prefer_longest_picks_first_maximum() {
    let r = PreferLongest;
    assert_eq!(r.choose(b"id", &[&b"a"[..], &b"abc"[..], &b"xyz"[..]]), 1);
    assert_eq!(r.choose(b"id", &[&b"abc"[..]]), 0);
    assert_eq!(r.choose(b"id", &[&b""[..], &b""[..]]), 0);
}

#[test]
fn records_per_block_always_covers_input() {
    assert_eq!(records_per_block(4, 2), 3);
    assert_eq!(records_per_block(0, 2), 1);
    assert_eq!(records_per_block(10, 1), 11);
    assert_eq!(records_per_block(9, 3), 4);
}

// -------------------- Properties --------------------

fn input_sets() -> impl Strategy<Value = Vec<BTreeMap<u16, Vec<u8>>>> {
    prop::collection::vec(
        prop::collection::btree_map(any::<u16>(), prop::collection::vec(any::<u8>(), 0..12), 0..24),
        1..5,
    )
}

fn expected_merge(inputs: &[BTreeMap<u16, Vec<u8>>]) -> Pairs {
    let mut expected: BTreeMap<u16, Vec<u8>> = BTreeMap::new();
    for input in inputs {
        for (k, v) in input {
            let replace = expected.get(k).map_or(true, |cur| v.len() > cur.len());
            if replace {
                expected.insert(*k, v.clone());
            }
        }
    }
    expected
        .into_iter()
        .map(|(k, v)| (k.to_be_bytes().to_vec(), v))
        .collect()
}

fn store(backend: &MemoryBackend, inputs: &[BTreeMap<u16, Vec<u8>>]) -> Vec<Uuid> {
    inputs
        .iter()
        .map(|input| {
            let items: Pairs = input
                .iter()
                .map(|(k, v)| (k.to_be_bytes().to_vec(), v.clone()))
                .collect();
            put_block_with(backend, &items, 3, |_| {}).unwrap()
        })
        .collect()
}

proptest! {
    #[test]
    fn merge_matches_sorted_resolved_union(inputs in input_sets()) {
        let backend = MemoryBackend::new();
        let blocks = store(&backend, &inputs);

        let (out, stats) = merge_all(&backend, &blocks, 1024, &PreferLongest).unwrap();
        let expected = expected_merge(&inputs);
        let total: usize = inputs.iter().map(BTreeMap::len).sum();

        prop_assert_eq!(stats.records_out as usize, expected.len());
        prop_assert_eq!(stats.duplicates_dropped as usize, total - expected.len());
        prop_assert!(out.windows(2).all(|w| w[0].0 < w[1].0));
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn chunk_size_does_not_change_output(inputs in input_sets()) {
        let backend = MemoryBackend::new();
        let blocks = store(&backend, &inputs);

        let (tiny, _) = merge_all(&backend, &blocks, 1, &PreferLongest).unwrap();
        let (huge, _) = merge_all(&backend, &blocks, 10 * 1024 * 1024, &PreferLongest).unwrap();
        prop_assert_eq!(tiny, huge);
    }
}
