//! Writer (§4.8): the only thread that opens write transactions. Drains
//! the write queue in batches and applies each batch under one commit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::import::job::JobStats;
use crate::import::queue::{Action, TargetSlot, WriteOp, WriteQueue};
use crate::import::slots::{self, IdlDisposition};
use crate::import::spool::Spool;
use crate::kvstore::{Dbi, DbiFlags, KvEnv};

pub struct Writer {
    env: Arc<KvEnv>,
    queue: Arc<WriteQueue>,
    abort: Arc<AtomicBool>,
    expected_closes: usize,
    closed: usize,
    dbis: HashMap<usize, Dbi>,
    dbi_names: HashMap<usize, String>,
    spool_dir: PathBuf,
    /// Slots currently redirecting writes to a spool instead of the KV
    /// store (§4.3), because a producer is concurrently reading the same
    /// table (reindex/upgrade scanning `id2entry`).
    delayed: HashSet<usize>,
    spools: HashMap<usize, Spool>,
    committed_ops: u64,
    /// Per-`parentid`-key subordinate counts, tracked in memory since the
    /// dup-sorted count isn't cheaply queryable mid-write-transaction.
    parent_counts: HashMap<Vec<u8>, u32>,
    stats: Arc<JobStats>,
}

/// Canonical dbi name for a slot, stable across the life of a job.
fn dbi_name(dbi_names: &mut HashMap<usize, String>, target: TargetSlot) -> String {
    dbi_names
        .entry(target.0)
        .or_insert_with(|| match target.0 {
            0 => "id2entry".to_string(),
            1 => "entryrdn".to_string(),
            2 => "parentid".to_string(),
            n => format!("attr{n}.db"),
        })
        .clone()
}

/// Resolves (opening if necessary) the dbi for `target`. A free function
/// taking its pieces explicitly, rather than a `&mut self` method, so a
/// caller can hold a write txn borrowed from `env` at the same time as a
/// mutable borrow of the writer's other fields (see `apply_batch`).
fn dbi_for(
    env: &KvEnv,
    dbis: &mut HashMap<usize, Dbi>,
    dbi_names: &mut HashMap<usize, String>,
    wtxn: &mut heed::RwTxn<'_>,
    target: TargetSlot,
) -> Result<Dbi> {
    if let Some(dbi) = dbis.get(&target.0) {
        return Ok(*dbi);
    }
    let name = dbi_name(dbi_names, target);
    let mut flags = DbiFlags::CREATE;
    if target.0 != 0 {
        flags |= DbiFlags::DUP_SORT;
    }
    let dbi = env.open_dbi(wtxn, &name, flags)?;
    dbis.insert(target.0, dbi);
    Ok(dbi)
}

/// Applies one op's effect to the KV store under `wtxn`, returning the
/// resulting `idl_disposition` for a `parentid` insert (§4.6 step 4).
/// Never sees `Action::Close`, which both `apply_batch` and spool replay
/// filter out before reaching here.
fn apply_to_store(
    wtxn: &mut heed::RwTxn<'_>,
    dbi: Dbi,
    op: &WriteOp,
    parent_counts: &mut HashMap<Vec<u8>, u32>,
) -> Result<IdlDisposition> {
    match op.action {
        Action::AddIndex => {
            dbi.put(wtxn, &op.key, &op.data)?;
            if op.target == slots::PARENT_ID {
                let count = parent_counts.entry(op.key.clone()).or_insert(0);
                *count += 1;
                return Ok(classify_disposition(*count));
            }
        }
        Action::Add | Action::AddEntryRdn | Action::AddVlv => {
            dbi.put(wtxn, &op.key, &op.data)?;
        }
        Action::DelIndex | Action::DelEntryRdn | Action::DelVlv => {
            dbi.del(wtxn, &op.key, Some(&op.data))?;
        }
        Action::Rmdir | Action::Open => {
            unreachable!("Open/Rmdir are mark_delayed/clear_delayed control ops, filtered out in apply_batch")
        }
        Action::Close => unreachable!("Close is filtered out before apply_to_store"),
    }
    Ok(IdlDisposition::Normal)
}

fn classify_disposition(count: u32) -> IdlDisposition {
    match count.cmp(&slots::ALLIDS_THRESHOLD) {
        std::cmp::Ordering::Less => IdlDisposition::Normal,
        std::cmp::Ordering::Equal => IdlDisposition::NowAllIds,
        std::cmp::Ordering::Greater => IdlDisposition::AllIds,
    }
}

impl Writer {
    pub fn new(
        env: Arc<KvEnv>,
        queue: Arc<WriteQueue>,
        abort: Arc<AtomicBool>,
        expected_closes: usize,
        spool_dir: PathBuf,
        stats: Arc<JobStats>,
    ) -> Writer {
        Writer {
            env,
            queue,
            abort,
            expected_closes,
            closed: 0,
            dbis: HashMap::new(),
            dbi_names: HashMap::new(),
            spool_dir,
            delayed: HashSet::new(),
            spools: HashMap::new(),
            committed_ops: 0,
            parent_counts: HashMap::new(),
            stats,
        }
    }

    /// Redirects subsequent writes to `target` into a spool file instead of
    /// applying them directly, for the duration a producer is concurrently
    /// reading that table. Idempotent.
    pub fn mark_delayed(&mut self, target: TargetSlot) -> Result<()> {
        if !self.delayed.insert(target.0) {
            return Ok(());
        }
        if !self.spools.contains_key(&target.0) {
            let name = dbi_name(&mut self.dbi_names, target);
            self.spools.insert(target.0, Spool::create(&self.spool_dir, &name)?);
        }
        Ok(())
    }

    /// Stops redirecting `target`'s writes to its spool. The spool itself
    /// is replayed once, at finishing time (§4.8), not here.
    pub fn clear_delayed(&mut self, target: TargetSlot) {
        self.delayed.remove(&target.0);
    }

    /// Runs the drain/apply/commit loop until every registered slot has
    /// closed and the queue is empty.
    pub fn run(&mut self) -> Result<()> {
        info!("writer starting");
        loop {
            let batch = self.queue.drain();
            if batch.is_empty() && self.queue.is_aborted() {
                warn!("writer observed abort with queue drained, exiting without final commit");
                return Ok(());
            }
            if batch.is_empty() && self.finished() {
                break;
            }
            self.apply_batch(batch)?;
            if self.finished() {
                break;
            }
        }
        self.replay_spools()?;
        info!(committed_ops = self.committed_ops, "writer finished");
        Ok(())
    }

    fn finished(&self) -> bool {
        self.closed >= self.expected_closes
    }

    /// Rewinds and applies every spool accumulated while its slot was
    /// delayed, each under its own write txn, in slot order (§4.8
    /// "replay spool files in slot order").
    fn replay_spools(&mut self) -> Result<()> {
        let mut targets: Vec<usize> = self.spools.keys().copied().collect();
        targets.sort_unstable();
        for target in targets {
            let spool = self.spools.remove(&target).expect("target came from spools.keys()");
            let mut wtxn = self.env.begin_write()?;
            let mut replayed = 0u64;
            let parent_counts = &mut self.parent_counts;
            let stats = &self.stats;
            spool.replay(|op| {
                let dbi = dbi_for(&self.env, &mut self.dbis, &mut self.dbi_names, &mut wtxn, op.target)?;
                let disposition = apply_to_store(&mut wtxn, dbi, &op, parent_counts)?;
                if disposition != IdlDisposition::Normal {
                    stats.note_allids_crossed();
                }
                replayed += 1;
                Ok(())
            })?;
            wtxn.commit()?;
            self.committed_ops += replayed;
            info!(target, replayed, "replayed spool for delayed slot");
        }
        Ok(())
    }

    fn apply_batch(&mut self, batch: Vec<WriteOp>) -> Result<()> {
        let mut wtxn = self.env.begin_write()?;
        let mut held_replies = Vec::new();
        for op in batch {
            if op.action == Action::Close {
                self.closed += 1;
                continue;
            }
            // `Open`/`Rmdir` double as control messages toggling a slot's
            // delayed-spool state from the producer side (reindex/upgrade
            // jobs), keeping the writer the sole owner of `delayed`/`spools`
            // state while letting another thread schedule the toggle
            // through the same queue everything else goes through.
            if op.action == Action::Open {
                if self.delayed.insert(op.target.0) && !self.spools.contains_key(&op.target.0) {
                    let name = dbi_name(&mut self.dbi_names, op.target);
                    self.spools.insert(op.target.0, Spool::create(&self.spool_dir, &name)?);
                }
                if let Some(tx) = &op.reply {
                    let _ = tx.send(0);
                }
                if op.is_sync() {
                    self.queue.release_sync();
                }
                continue;
            }
            if op.action == Action::Rmdir {
                self.delayed.remove(&op.target.0);
                if let Some(tx) = &op.reply {
                    let _ = tx.send(0);
                }
                if op.is_sync() {
                    self.queue.release_sync();
                }
                continue;
            }
            if self.delayed.contains(&op.target.0) {
                let spool = self
                    .spools
                    .get_mut(&op.target.0)
                    .expect("mark_delayed always creates the spool before delaying a slot");
                spool.append(&op)?;
                continue;
            }
            let is_sync = op.is_sync();
            let reply = op.reply.clone();
            let dbi = dbi_for(&self.env, &mut self.dbis, &mut self.dbi_names, &mut wtxn, op.target)?;
            let disposition = apply_to_store(&mut wtxn, dbi, &op, &mut self.parent_counts)?;
            if disposition != IdlDisposition::Normal {
                self.stats.note_allids_crossed();
            }
            self.committed_ops += 1;
            if is_sync {
                held_replies.push(reply);
            }
        }
        wtxn.commit()?;
        for reply in held_replies {
            if let Some(tx) = reply {
                let _ = tx.send(0);
            }
            self.queue.release_sync();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_writer(dir: &std::path::Path) -> Writer {
        let env = Arc::new(KvEnv::open(&dir.join("db"), 8).unwrap());
        Writer::new(
            env,
            Arc::new(WriteQueue::new()),
            Arc::new(AtomicBool::new(false)),
            1,
            dir.join("spool"),
            Arc::new(JobStats::default()),
        )
    }

    #[test]
    fn delayed_write_spools_instead_of_applying_directly() {
        let dir = tempdir().unwrap();
        let mut writer = new_writer(dir.path());
        writer.mark_delayed(TargetSlot(0)).unwrap();

        let op = WriteOp::new(Action::Add, TargetSlot(0), b"dn=a".to_vec(), b"entry-a".to_vec());
        writer.apply_batch(vec![op]).unwrap();

        // Not yet visible: it went to the spool, so id2entry was never
        // even created as a dbi.
        let rtxn = writer.env.begin_read().unwrap();
        assert!(writer.env.open_dbi_ro(&rtxn, "id2entry").is_err());
        drop(rtxn);

        writer.clear_delayed(TargetSlot(0));
        writer.replay_spools().unwrap();

        let rtxn = writer.env.begin_read().unwrap();
        let dbi = writer.env.open_dbi_ro(&rtxn, "id2entry").unwrap();
        assert_eq!(dbi.get(&rtxn, b"dn=a").unwrap(), Some(b"entry-a".as_slice()));
    }

    #[test]
    fn run_drains_to_completion_and_replays_any_outstanding_spool() {
        let dir = tempdir().unwrap();
        let mut writer = new_writer(dir.path());
        writer.mark_delayed(TargetSlot(0)).unwrap();
        writer.apply_batch(vec![WriteOp::new(Action::Add, TargetSlot(0), b"dn=b".to_vec(), b"entry-b".to_vec())]).unwrap();
        writer.closed = writer.expected_closes;
        writer.replay_spools().unwrap();

        let rtxn = writer.env.begin_read().unwrap();
        let dbi = writer.env.open_dbi_ro(&rtxn, "id2entry").unwrap();
        assert_eq!(dbi.get(&rtxn, b"dn=b").unwrap(), Some(b"entry-b".as_slice()));
    }

    #[test]
    fn parentid_insert_crossing_threshold_notifies_subordinate_accumulator() {
        let dir = tempdir().unwrap();
        let mut writer = new_writer(dir.path());
        let stats = writer.stats.clone();

        let parent_key = 7u32.to_be_bytes().to_vec();
        let mut ops = Vec::new();
        for child in 0..slots::ALLIDS_THRESHOLD {
            ops.push(WriteOp::new(Action::AddIndex, slots::PARENT_ID, parent_key.clone(), child.to_be_bytes().to_vec()));
        }
        writer.apply_batch(ops).unwrap();
        assert_eq!(stats.subordinates_allids.load(std::sync::atomic::Ordering::Relaxed), 1);

        writer.apply_batch(vec![WriteOp::new(
            Action::AddIndex,
            slots::PARENT_ID,
            parent_key,
            slots::ALLIDS_THRESHOLD.to_be_bytes().to_vec(),
        )])
        .unwrap();
        assert_eq!(stats.subordinates_allids.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}
