use crate::*;
use uuid::Uuid;

fn input(level: u8, start: u64, end: u64) -> BlockMeta {
    let mut m = BlockMeta::new(Uuid::new_v4(), "tenant");
    m.compaction_level = level;
    m.start_time_ms = start;
    m.end_time_ms = end;
    m
}

#[test]
fn json_roundtrip_preserves_fields() {
    let mut meta = BlockMeta::new(Uuid::new_v4(), "acme");
    meta.observe_object(b"b", 10);
    meta.observe_object(b"d", 12);
    meta.bloom_fp = 0.01;

    let decoded = BlockMeta::from_json(&meta.to_json().unwrap()).unwrap();
    assert_eq!(decoded, meta);
}

#[test]
fn malformed_json_is_an_error() {
    assert!(matches!(
        BlockMeta::from_json(b"{not json"),
        Err(EncodingError::Meta(_))
    ));
}

#[test]
fn observe_tracks_id_range_and_totals() {
    let mut meta = BlockMeta::new(Uuid::new_v4(), "acme");
    meta.observe_object(b"m", 5);
    meta.observe_object(b"c", 7);
    meta.observe_object(b"x", 9);

    assert_eq!(meta.min_id, b"c");
    assert_eq!(meta.max_id, b"x");
    assert_eq!(meta.total_objects, 3);
    assert_eq!(meta.size, 21);
}

#[test]
fn compacted_meta_unions_inputs() {
    let inputs = vec![input(0, 100, 200), input(2, 50, 150), input(1, 0, 0)];
    let meta = BlockMeta::compacted_from(Uuid::new_v4(), "tenant", &inputs, 0.02, 4);

    assert_eq!(meta.compaction_level, 3);
    assert_eq!(meta.start_time_ms, 50);
    assert_eq!(meta.end_time_ms, 200);
    assert_eq!(meta.bloom_fp, 0.02);
    assert_eq!(meta.index_downsample, 4);
    assert_eq!(meta.total_objects, 0);
}

#[test]
fn compacted_meta_without_inputs_starts_at_level_one() {
    let meta = BlockMeta::compacted_from(Uuid::new_v4(), "tenant", &[], 0.05, 1);
    assert_eq!(meta.compaction_level, 1);
    assert_eq!(meta.start_time_ms, 0);
}
