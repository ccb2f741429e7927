use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use backend::BlockReader;
use compactor::{CompactionJob, CompactionPool, JobResult};
use encoding::BlockMeta;
use tracing::debug;
use uuid::Uuid;
use wal::Wal;

/// Executes one REPL line at a time against the block store.
pub struct Shell {
    reader: Arc<dyn BlockReader>,
    wal: Arc<Wal>,
    pool: CompactionPool,
}

impl Shell {
    pub fn new(reader: Arc<dyn BlockReader>, wal: Arc<Wal>, pool: CompactionPool) -> Self {
        Self { reader, wal, pool }
    }

    /// Runs `line`, writing the response to `out`. Returns `false` when the
    /// shell should exit.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<bool> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(true);
        };

        match cmd.to_uppercase().as_str() {
            "TENANTS" => match self.reader.tenants() {
                Ok(tenants) if tenants.is_empty() => writeln!(out, "(empty)")?,
                Ok(tenants) => {
                    for t in &tenants {
                        writeln!(out, "{}", t)?;
                    }
                    writeln!(out, "({} tenants)", tenants.len())?;
                }
                Err(e) => writeln!(out, "ERR list failed: {}", e)?,
            },
            "BLOCKS" => match parts.next() {
                Some(tenant) => self.blocks(tenant, out)?,
                None => writeln!(out, "ERR usage: BLOCKS tenant")?,
            },
            "COMPACT" => match parts.next() {
                Some("*") => self.compact_all(out)?,
                Some(tenant) => {
                    let ids: Vec<&str> = parts.collect();
                    self.compact(tenant, &ids, out)?;
                }
                None => writeln!(out, "ERR usage: COMPACT tenant [block_id ...] | COMPACT *")?,
            },
            "WORKING" => match self.wal.working_blocks() {
                Ok(blocks) if blocks.is_empty() => writeln!(out, "(empty)")?,
                Ok(blocks) => {
                    for (id, tenant) in &blocks {
                        writeln!(out, "{} {}", id, tenant)?;
                    }
                    writeln!(out, "({} working blocks)", blocks.len())?;
                }
                Err(e) => writeln!(out, "ERR list failed: {}", e)?,
            },
            "EXIT" | "QUIT" => {
                writeln!(out, "bye")?;
                return Ok(false);
            }
            other => writeln!(out, "unknown command: {}", other)?,
        }
        Ok(true)
    }

    fn blocks(&self, tenant: &str, out: &mut dyn Write) -> Result<()> {
        let metas = match self.live_metas(tenant) {
            Ok(metas) => metas,
            Err(e) => {
                writeln!(out, "ERR list failed: {}", e)?;
                return Ok(());
            }
        };
        if metas.is_empty() {
            writeln!(out, "(empty)")?;
            return Ok(());
        }
        for m in &metas {
            writeln!(
                out,
                "{} objects={} size={} level={} time=[{}, {}]",
                m.block_id, m.total_objects, m.size, m.compaction_level, m.start_time_ms, m.end_time_ms
            )?;
        }
        writeln!(out, "({} blocks)", metas.len())?;
        Ok(())
    }

    fn compact(&self, tenant: &str, ids: &[&str], out: &mut dyn Write) -> Result<()> {
        let block_ids = if ids.is_empty() {
            match self.oldest_blocks(tenant) {
                Ok(ids) if ids.len() < 2 => {
                    writeln!(out, "nothing to compact")?;
                    return Ok(());
                }
                Ok(ids) => ids,
                Err(e) => {
                    writeln!(out, "ERR list failed: {}", e)?;
                    return Ok(());
                }
            }
        } else {
            let mut parsed = Vec::with_capacity(ids.len());
            for raw in ids {
                match Uuid::parse_str(raw) {
                    Ok(id) => parsed.push(id),
                    Err(_) => {
                        writeln!(out, "ERR invalid block id: {}", raw)?;
                        return Ok(());
                    }
                }
            }
            parsed
        };

        let results = self.pool.run(&[CompactionJob::new(tenant, block_ids)]);
        for result in &results {
            report(result, out)?;
        }
        Ok(())
    }

    fn compact_all(&self, out: &mut dyn Write) -> Result<()> {
        let tenants = match self.reader.tenants() {
            Ok(t) => t,
            Err(e) => {
                writeln!(out, "ERR list failed: {}", e)?;
                return Ok(());
            }
        };

        let mut jobs = Vec::new();
        for tenant in tenants {
            match self.oldest_blocks(&tenant) {
                Ok(ids) if ids.len() >= 2 => jobs.push(CompactionJob::new(tenant, ids)),
                Ok(_) => debug!(%tenant, "not enough blocks to compact"),
                Err(e) => writeln!(out, "ERR {}: {}", tenant, e)?,
            }
        }
        if jobs.is_empty() {
            writeln!(out, "nothing to compact")?;
            return Ok(());
        }

        for result in self.pool.run(&jobs) {
            report(&result, out)?;
        }
        Ok(())
    }

    /// The oldest `input_blocks` live blocks by start time, then id.
    fn oldest_blocks(&self, tenant: &str) -> Result<Vec<Uuid>> {
        let limit = self.pool.compactor().config().input_blocks;
        let mut metas = self.live_metas(tenant)?;
        metas.sort_by(|a, b| {
            (a.start_time_ms, a.block_id).cmp(&(b.start_time_ms, b.block_id))
        });
        Ok(metas.into_iter().take(limit).map(|m| m.block_id).collect())
    }

    fn live_metas(&self, tenant: &str) -> Result<Vec<BlockMeta>> {
        let mut metas = Vec::new();
        for id in self.reader.blocks(tenant)? {
            metas.push(BlockMeta::from_json(&self.reader.read_block_meta(id, tenant)?)?);
        }
        Ok(metas)
    }
}

fn report(result: &JobResult, out: &mut dyn Write) -> Result<()> {
    match result {
        Ok(outcome) => {
            writeln!(
                out,
                "OK {} shipped={} marked={} records={} duplicates={}",
                outcome.tenant,
                outcome.ledger.shipped.len(),
                outcome.ledger.marked.len(),
                outcome.stats.merge.records_out,
                outcome.stats.merge.duplicates_dropped
            )?;
            for shipped in &outcome.ledger.shipped {
                writeln!(out, "  + {} objects={}", shipped.block_id, shipped.total_objects)?;
            }
            for failure in &outcome.ledger.cleanup.failures {
                writeln!(out, "WARN {}", failure)?;
            }
        }
        Err(failure) => {
            writeln!(out, "ERR {}", failure)?;
            if failure.is_partial() {
                for shipped in &failure.ledger.shipped {
                    writeln!(out, "  shipped {}", shipped.block_id)?;
                }
                for id in failure.ledger.unmarked_inputs() {
                    writeln!(out, "  unmarked {}", id)?;
                }
            }
        }
    }
    Ok(())
}
