use crate::*;
use anyhow::Result;
use std::io::Read;
use uuid::Uuid;

#[test]
fn memory_backend_roundtrips_block_artifacts() -> Result<()> {
    let backend = MemoryBackend::new();
    let id = Uuid::new_v4();
    backend.write_block(id, "acme", b"meta", b"bloom", b"index", &mut &b"abcdef"[..])?;

    assert_eq!(backend.read_block_meta(id, "acme")?, b"meta");
    assert_eq!(backend.read_object_range(id, "acme", 1, 3)?, b"bcd");
    assert!(matches!(
        backend.read_object_range(id, "acme", 4, 3),
        Err(BackendError::OutOfRange { .. })
    ));
    assert_eq!(backend.blocks("acme")?, vec![id]);
    Ok(())
}

#[test]
fn memory_range_overflowing_u64_is_out_of_range() -> Result<()> {
    let backend = MemoryBackend::new();
    let id = Uuid::new_v4();
    backend.write_block(id, "acme", b"meta", b"bloom", b"index", &mut &b"abcdef"[..])?;

    assert!(matches!(
        backend.read_object_range(id, "acme", u64::MAX - 4, 30),
        Err(BackendError::OutOfRange { end: u64::MAX, size: 6, .. })
    ));
    Ok(())
}

#[test]
fn memory_marking_hides_block() -> Result<()> {
    let backend = MemoryBackend::new();
    let id = Uuid::new_v4();
    backend.write_block(id, "acme", b"m", b"", b"", &mut &b""[..])?;

    backend.mark_compacted(id, "acme")?;
    backend.mark_compacted(id, "acme")?;
    assert!(backend.is_compacted(id, "acme"));
    assert!(backend.blocks("acme")?.is_empty());
    assert_eq!(backend.tenants()?, vec!["acme".to_string()]);
    Ok(())
}

#[test]
fn memory_working_block_appends_and_reads_back() -> Result<()> {
    let backend = MemoryBackend::new();
    let mut wb = backend.new_working_block(Uuid::new_v4(), "acme")?;
    assert_eq!(backend.live_working_blocks(), 1);

    assert_eq!(wb.append(b"hello")?, 0);
    assert_eq!(wb.append(b" world")?, 5);
    assert_eq!(wb.size(), 11);

    let mut out = Vec::new();
    wb.data()?.read_to_end(&mut out)?;
    assert_eq!(out, b"hello world");

    wb.clear()?;
    assert_eq!(backend.live_working_blocks(), 0);
    Ok(())
}
