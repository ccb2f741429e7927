use std::sync::Arc;

use backend::{BlockWriter, MemoryBackend};
use compactor::{CompactionJob, Compactor};
use config::CompactorConfig;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use encoding::{encode_object, BlockMeta, IndexWriter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const N_BLOCKS: usize = 4;
const OBJECTS_PER_BLOCK: usize = 5_000;
const OBJECT_SIZE: usize = 200;

/// Blocks 0 and 2 hold the even ids, 1 and 3 the odd ones, so every id is
/// stored twice.
fn seed(backend: &MemoryBackend) -> Vec<Uuid> {
    (0..N_BLOCKS)
        .map(|b| {
            let block_id = Uuid::new_v4();
            let mut meta = BlockMeta::new(block_id, "bench");
            let mut index = IndexWriter::new(10);
            let mut data = Vec::new();
            for i in 0..OBJECTS_PER_BLOCK {
                let id = ((i * 2 + b % 2) as u64).to_be_bytes();
                let start = data.len();
                encode_object(&id, &vec![b'x'; OBJECT_SIZE], &mut data).unwrap();
                let len = data.len() - start;
                index.add(&id, start as u64, len as u32);
                meta.observe_object(&id, len as u64);
            }
            backend
                .write_block(
                    block_id,
                    "bench",
                    &meta.to_json().unwrap(),
                    &[],
                    &index.to_bytes(),
                    &mut data.as_slice(),
                )
                .unwrap();
            block_id
        })
        .collect()
}

fn compaction_benchmark(c: &mut Criterion, name: &str, chunk_size: u32) {
    c.bench_function(name, |b| {
        b.iter_batched(
            || {
                let backend = MemoryBackend::new();
                let blocks = seed(&backend);
                (backend, blocks)
            },
            |(backend, blocks)| {
                let shared = Arc::new(backend);
                let cfg = CompactorConfig::default().with_chunk_size_bytes(chunk_size);
                let compactor = Compactor::from_backend(shared.clone(), shared, cfg).unwrap();
                compactor
                    .compact(&CompactionJob::new("bench", blocks), &CancellationToken::new())
                    .unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn compact_default_chunks(c: &mut Criterion) {
    compaction_benchmark(c, "compact_4x5k_default_chunks", config::DEFAULT_CHUNK_SIZE_BYTES);
}

fn compact_small_chunks(c: &mut Criterion) {
    compaction_benchmark(c, "compact_4x5k_4k_chunks", 4 * 1024);
}

criterion_group!(benches, compact_default_chunks, compact_small_chunks);
criterion_main!(benches);
