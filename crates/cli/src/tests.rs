use std::sync::Arc;

use backend::LocalBackend;
use compactor::{CompactionPool, Compactor};
use config::CompactorConfig;
use tempfile::tempdir;
use uuid::Uuid;
use wal::Wal;

use crate::shell::Shell;

fn shell(dir: &std::path::Path) -> Shell {
    let backend = Arc::new(LocalBackend::open(dir.join("blocks")).unwrap());
    let wal = Arc::new(Wal::open(dir.join("wal"), false).unwrap());
    let compactor =
        Compactor::from_backend(backend.clone(), wal.clone(), CompactorConfig::default())
            .unwrap();
    Shell::new(backend, wal, CompactionPool::new(compactor))
}

fn run(shell: &mut Shell, line: &str) -> (bool, String) {
    let mut out = Vec::new();
    let keep_going = shell.execute(line, &mut out).unwrap();
    (keep_going, String::from_utf8(out).unwrap())
}

#[test]
fn empty_store_lists_nothing() {
    let dir = tempdir().unwrap();
    let mut sh = shell(dir.path());
    assert_eq!(run(&mut sh, "TENANTS").1, "(empty)\n");
    assert_eq!(run(&mut sh, "blocks acme").1, "(empty)\n");
    assert_eq!(run(&mut sh, "WORKING").1, "(empty)\n");
}

#[test]
fn usage_errors_are_reported() {
    let dir = tempdir().unwrap();
    let mut sh = shell(dir.path());
    assert!(run(&mut sh, "BLOCKS").1.starts_with("ERR usage"));
    assert!(run(&mut sh, "COMPACT").1.starts_with("ERR usage"));
    assert_eq!(
        run(&mut sh, "COMPACT acme not-a-uuid").1,
        "ERR invalid block id: not-a-uuid\n"
    );
    assert_eq!(run(&mut sh, "FROB").1, "unknown command: FROB\n");
    assert_eq!(run(&mut sh, "   ").1, "");
}

#[test]
fn compact_without_blocks_does_nothing() {
    let dir = tempdir().unwrap();
    let mut sh = shell(dir.path());
    assert_eq!(run(&mut sh, "COMPACT acme").1, "nothing to compact\n");
    assert_eq!(run(&mut sh, "COMPACT *").1, "nothing to compact\n");
}

#[test]
fn compact_missing_block_reports_failure() {
    let dir = tempdir().unwrap();
    let mut sh = shell(dir.path());
    let (_, out) = run(&mut sh, &format!("COMPACT acme {}", Uuid::new_v4()));
    assert!(out.starts_with("ERR compaction for tenant acme failed while loading"));
}

#[test]
fn exit_stops_the_loop() {
    let dir = tempdir().unwrap();
    let mut sh = shell(dir.path());
    assert_eq!(run(&mut sh, "quit"), (false, "bye\n".to_string()));
}
