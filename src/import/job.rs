//! Job controller (§4.9): spawns producer/foreman/workers/writer, owns the
//! abort flag, and joins everything into a single `JobResult`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info};

use crate::common::csn::CsnGenerator;
use crate::common::EntryId;
use crate::config::ImportConfig;
use crate::contracts::SchemaChecker;
use crate::entrywsi::{self, ModType, Modification};
use crate::error::{DbError, Result};
use crate::import::fifo::Fifo;
use crate::import::foreman::Foreman;
use crate::import::ldif::LdifSource;
use crate::import::producer::Producer;
use crate::import::queue::{Action, TargetSlot, WriteOp, WriteQueue};
use crate::import::reindex::ReindexProducer;
use crate::import::slots;
use crate::import::upgrade;
use crate::import::worker::Worker;
use crate::import::writer::Writer;
use crate::kvstore::KvEnv;

/// Per-thread lifecycle state (§7). Threads never panic through their main
/// loop; an error sets `Aborted` locally and `ABORT` globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Pause,
    Running,
    Waiting,
    Finished,
    Aborted,
    Quit,
}

/// Counters snapshotted by progress reporting and by tests.
#[derive(Default)]
pub struct JobStats {
    pub processed: AtomicUsize,
    pub skipped: AtomicUsize,
    pub warnings: Mutex<Vec<String>>,
    /// Number of `parentid` keys whose subordinate list has crossed
    /// `slots::ALLIDS_THRESHOLD` (§4.6 step 4), notified by the writer.
    pub subordinates_allids: AtomicUsize,
}

impl JobStats {
    pub fn warn(&self, message: impl Into<String>) {
        self.warnings.lock().unwrap().push(message.into());
    }

    pub fn note_allids_crossed(&self) {
        self.subordinates_allids.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a completed (or aborted) import job.
#[derive(Debug)]
pub struct JobResult {
    pub processed: usize,
    pub skipped: usize,
    pub aborted: bool,
    pub warnings: Vec<String>,
}

/// One thread's closure result, joined by the controller.
pub type ThreadReport = std::result::Result<(), DbError>;

/// Spawns and supervises one bulk-import job: one producer, one foreman,
/// N workers (one per indexed attribute), and one writer (§5).
pub struct JobController {
    env: Arc<KvEnv>,
    config: ImportConfig,
    abort: Arc<AtomicBool>,
    stats: Arc<JobStats>,
    first_id: AtomicU32,
}

impl JobController {
    pub fn new(env: Arc<KvEnv>, config: ImportConfig) -> JobController {
        JobController {
            env,
            config,
            abort: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(JobStats::default()),
            first_id: AtomicU32::new(1),
        }
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn set_first_id(&self, id: u32) {
        self.first_id.store(id, Ordering::Release);
    }

    /// Runs a bulk-import job reading from `sources` in order, blocking
    /// until every thread finishes or the job aborts.
    pub fn run_bulk_import(
        &self,
        mut sources: Vec<(Box<dyn LdifSource>, String)>,
        schema: Arc<dyn SchemaChecker>,
    ) -> Result<JobResult> {
        let fifo = Arc::new(Fifo::new(self.config.fifo_ring_len, self.config.indexed_attributes.len() as u32));
        let queue = Arc::new(WriteQueue::new());

        let writer_env = self.env.clone();
        let writer_queue = queue.clone();
        let writer_abort = self.abort.clone();
        let writer_stats = self.stats.clone();
        let expected_closes = 1 + self.config.indexed_attributes.len();
        let spool_dir = self.config.db_home.join(&self.config.identity.instance_name);
        let writer_handle = thread::spawn(move || -> ThreadReport {
            let mut writer = Writer::new(writer_env, writer_queue, writer_abort, expected_closes, spool_dir, writer_stats);
            writer.run()
        });

        let foreman_fifo = fifo.clone();
        let foreman_queue = queue.clone();
        let foreman_env = self.env.clone();
        let foreman_abort = self.abort.clone();
        let foreman_config = self.config.clone();
        let foreman_stats = self.stats.clone();
        let first_id = self.first_id.load(Ordering::Acquire);
        let foreman_handle = thread::spawn(move || -> ThreadReport {
            let mut foreman = Foreman::new(foreman_env, foreman_fifo, foreman_queue, foreman_abort, foreman_config, foreman_stats);
            foreman.run(EntryId(first_id))
        });

        let mut worker_handles = Vec::new();
        for (index, attr) in self.config.indexed_attributes.clone().into_iter().enumerate() {
            let worker_fifo = fifo.clone();
            let worker_queue = queue.clone();
            let worker_env = self.env.clone();
            let worker_abort = self.abort.clone();
            worker_handles.push(thread::spawn(move || -> ThreadReport {
                let mut worker = Worker::new(attr, worker_env, worker_fifo, worker_queue, worker_abort)
                    .with_slot_index(index)
                    .with_first_id(EntryId(first_id));
                worker.run()
            }));
        }

        // The producer runs on this (the controller's) thread: it is the
        // only stage with no downstream consumer of its own, so there is
        // nothing gained by detaching it, and keeping it inline makes it
        // trivial to propagate an I/O error from opening the next source.
        let result = (|| -> Result<()> {
            for (mut source, name) in sources.drain(..) {
                if self.abort.load(Ordering::Acquire) {
                    break;
                }
                let producer = Producer::new(
                    &self.config,
                    fifo.clone(),
                    schema.as_ref(),
                    self.stats.clone(),
                    self.abort.clone(),
                    self.first_id.load(Ordering::Acquire),
                );
                producer.run(source.as_mut(), &name)?;
            }
            Ok(())
        })();
        if let Err(e) = &result {
            error!(error = %e, "producer failed, aborting job");
            self.abort.store(true, Ordering::Release);
        }

        let foreman_result = foreman_handle.join().expect("foreman thread panicked");
        for handle in worker_handles {
            let _ = handle.join().expect("worker thread panicked");
        }
        // An aborted foreman returns before pushing any of its own `Close`
        // ops (see `Foreman::run`), so the writer's expected-close count
        // can never be reached once `self.abort` is set; tell the queue
        // directly instead of waiting for a count that will never arrive.
        // Otherwise, every remaining `Close` is non-synchronous and, once
        // the last entry's synchronous `id2entry` write has been applied,
        // nothing else is guaranteed to cross MIN_WEIGHT and wake the
        // writer's drain for a small job — force one last flush now that
        // every Close is guaranteed already queued (both joins above
        // happened-after their pushes).
        if self.abort.load(Ordering::Acquire) {
            queue.abort();
        } else {
            let _ = push_sync_control(&queue, Action::Open, slots::ID2ENTRY);
        }
        let writer_result = writer_handle.join().expect("writer thread panicked");

        if let Err(e) = foreman_result {
            error!(error = %e, "foreman reported failure");
        }
        if let Err(e) = &writer_result {
            error!(error = %e, "writer reported failure");
        }

        let aborted = self.abort.load(Ordering::Acquire);
        info!(aborted, "job finished");

        writer_result?;
        result?;

        Ok(JobResult {
            processed: self.stats.processed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            aborted,
            warnings: self.stats.warnings.lock().unwrap().clone(),
        })
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Runs a reindex job (§4.5 "Reindex producer variant"): rebuilds every
    /// configured per-attribute index from the entries already durable in
    /// `id2entry`, without touching `id2entry`/`entryrdn`/`parentid`
    /// themselves. The scan runs inline on this thread, the same way
    /// `run_bulk_import` keeps its producer inline, feeding workers
    /// directly since there is no foreman stage to rebuild identity
    /// indexes that already exist.
    pub fn run_reindex(&self) -> Result<JobResult> {
        let fifo = Arc::new(Fifo::new(self.config.fifo_ring_len, self.config.indexed_attributes.len() as u32));
        let queue = Arc::new(WriteQueue::new());

        let writer_env = self.env.clone();
        let writer_queue = queue.clone();
        let writer_abort = self.abort.clone();
        let writer_stats = self.stats.clone();
        let expected_closes = self.config.indexed_attributes.len();
        let spool_dir = self.config.db_home.join(&self.config.identity.instance_name);
        let writer_handle = thread::spawn(move || -> ThreadReport {
            let mut writer = Writer::new(writer_env, writer_queue, writer_abort, expected_closes, spool_dir, writer_stats);
            writer.run()
        });

        let first_id = self.first_id.load(Ordering::Acquire);
        let mut worker_handles = Vec::new();
        for (index, attr) in self.config.indexed_attributes.clone().into_iter().enumerate() {
            let worker_fifo = fifo.clone();
            let worker_queue = queue.clone();
            let worker_env = self.env.clone();
            let worker_abort = self.abort.clone();
            worker_handles.push(thread::spawn(move || -> ThreadReport {
                let mut worker = Worker::new(attr, worker_env, worker_fifo, worker_queue, worker_abort)
                    .with_slot_index(index)
                    .with_first_id(EntryId(first_id));
                worker.run()
            }));
        }

        let result = (|| -> Result<()> {
            let mut reindex = ReindexProducer::new(&self.env);
            reindex.scan(|entry| {
                if self.abort.load(Ordering::Acquire) {
                    return Ok(());
                }
                let encoded = entry.encode()?;
                let size = encoded.len();
                if !fifo.fit_or_expand(size) {
                    self.stats.warn(format!("entry {} exceeds FIFO capacity, skipping", entry.dn));
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                fifo.wait_for_space(size);
                let id = entry.id;
                fifo.store(entry, size, "reindex", 0);
                fifo.set_ready(id.0, id.0);
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        })();
        if let Err(e) = &result {
            error!(error = %e, "reindex scan failed, aborting job");
            self.abort.store(true, Ordering::Release);
        }

        for handle in worker_handles {
            let _ = handle.join().expect("worker thread panicked");
        }
        // Every worker's `Close` (and any trailing `AddIndex` writes) is
        // now sitting in the queue, but a small job may never accumulate
        // enough weight on its own to cross `MIN_WEIGHT` and wake the
        // writer's drain. Force one final flush through the same
        // sync-control path `run_upgrade_apply` uses; `ID2ENTRY` is never
        // a reindex write target, so toggling its delayed flag here has no
        // observable effect beyond waking the writer.
        let _ = push_sync_control(&queue, Action::Open, slots::ID2ENTRY);
        let writer_result = writer_handle.join().expect("writer thread panicked");
        if let Err(e) = &writer_result {
            error!(error = %e, "writer reported failure");
        }

        let aborted = self.abort.load(Ordering::Acquire);
        info!(aborted, "reindex job finished");

        writer_result?;
        result?;

        Ok(JobResult {
            processed: self.stats.processed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            aborted,
            warnings: self.stats.warnings.lock().unwrap().clone(),
        })
    }

    /// Runs an upgrade-DN job (§4.5 "Upgrade-DN producer variant"). In
    /// dry-run mode (`config.dry_run`), scans `id2entry` and records every
    /// RDN with a double-space conflict into `<conflict_dir>/<instance>_
    /// dn_norm_sp.txt`. Otherwise reads that file as an allowlist and
    /// renames conflicting entries (and normalises the primary's spacing)
    /// in place.
    pub fn run_upgrade(&self, conflict_dir: &Path) -> Result<JobResult> {
        if self.config.dry_run {
            self.run_upgrade_dry_run(conflict_dir)
        } else {
            let conflict_file = conflict_dir.join(format!("{}_dn_norm_sp.txt", self.config.identity.instance_name));
            self.run_upgrade_apply(&conflict_file)
        }
    }

    fn run_upgrade_dry_run(&self, conflict_dir: &Path) -> Result<JobResult> {
        let mut writer = upgrade::ConflictFileWriter::create(conflict_dir, &self.config.identity.instance_name)?;
        let mut scanned = 0usize;
        let mut flagged = 0usize;
        let mut reindex = ReindexProducer::new(&self.env);
        reindex.scan(|entry| {
            scanned += 1;
            if let Some(rdn) = entry.dn.split(',').next() {
                if upgrade::classify_rdn(rdn).contains(upgrade::DnUpgradeStatus::DN_NORM_SP) {
                    writer.record(&entry.dn, entry.id)?;
                    flagged += 1;
                }
            }
            Ok(())
        })?;
        info!(scanned, flagged, path = %writer.path().display(), "upgrade-dn dry run finished");
        Ok(JobResult {
            processed: flagged,
            skipped: scanned.saturating_sub(flagged),
            aborted: false,
            warnings: self.stats.warnings.lock().unwrap().clone(),
        })
    }

    fn run_upgrade_apply(&self, conflict_file: &Path) -> Result<JobResult> {
        let table = upgrade::read_conflict_table(conflict_file)?;
        let mut primaries = HashSet::new();
        let mut renamed_eids = HashSet::new();
        for (&primary, conflicts) in table.iter() {
            primaries.insert(primary);
            renamed_eids.extend(conflicts.iter().copied());
        }

        let queue = Arc::new(WriteQueue::new());
        let writer_env = self.env.clone();
        let writer_queue = queue.clone();
        let writer_abort = self.abort.clone();
        let writer_stats = self.stats.clone();
        let spool_dir = self.config.db_home.join(&self.config.identity.instance_name);
        let writer_handle = thread::spawn(move || -> ThreadReport {
            let mut writer = Writer::new(writer_env, writer_queue, writer_abort, 1, spool_dir, writer_stats);
            writer.run()
        });

        // `id2entry`/`entryrdn` are delayed for the scan's duration: the
        // scan reads both via `ReindexProducer` while renames below write
        // back into them, the exact case the delayed-slot spool (§4.3)
        // exists for.
        let setup_result = (|| -> Result<()> {
            push_sync_control(&queue, Action::Open, slots::ID2ENTRY)?;
            push_sync_control(&queue, Action::Open, slots::ENTRY_DN_OR_RDN)?;
            Ok(())
        })();
        if setup_result.is_err() {
            self.abort.store(true, Ordering::Release);
            queue.abort();
        }

        let csn_gen = CsnGenerator::new(1);
        let result = if setup_result.is_ok() {
            (|| -> Result<()> {
                let mut reindex = ReindexProducer::new(&self.env);
                reindex.scan(|mut entry| {
                    if self.abort.load(Ordering::Acquire) {
                        return Ok(());
                    }
                    let is_primary = primaries.contains(&entry.id);
                    let is_conflict = renamed_eids.contains(&entry.id);
                    if !is_primary && !is_conflict {
                        return Ok(());
                    }
                    let Some(comma) = entry.dn.find(',') else {
                        self.stats.warn(format!("cannot split rdn from {}, skipping upgrade rename", entry.dn));
                        return Ok(());
                    };
                    let rdn = entry.dn[..comma].to_string();
                    let parent_dn = entry.dn[comma + 1..].to_string();
                    let Some((naming_attr, rdn_value)) = rdn.split_once('=') else {
                        self.stats.warn(format!("malformed rdn {rdn}, skipping upgrade rename"));
                        return Ok(());
                    };
                    let naming_attr = naming_attr.to_string();

                    let new_dn = if is_conflict {
                        upgrade::conflict_rename(&rdn, entry.id, &parent_dn)
                    } else {
                        format!("{naming_attr}={},{parent_dn}", upgrade::normalise_spaces(rdn_value))
                    };
                    if new_dn == entry.dn {
                        return Ok(());
                    }
                    let new_rdn_value = new_dn
                        .split_once(',')
                        .map_or(new_dn.as_str(), |(r, _)| r)
                        .split_once('=')
                        .map(|(_, v)| v.to_string())
                        .unwrap_or_default();

                    let csn = csn_gen.next(wall_clock_seconds());
                    let modification = Modification {
                        attr_name: naming_attr,
                        mod_type: ModType::Replace,
                        value: Some(new_rdn_value.into_bytes()),
                        csn: Some(csn),
                    };
                    entrywsi::apply_modifications(&mut entry, std::slice::from_ref(&modification));

                    let old_dn = entry.dn.clone();
                    entry.dn = new_dn.clone();
                    let encoded = entry.encode()?;
                    self.stats.processed.fetch_add(1, Ordering::Relaxed);

                    queue.push(WriteOp::new(Action::Add, slots::ID2ENTRY, entry.id.to_be_bytes().to_vec(), encoded));
                    queue.push(WriteOp::new(
                        Action::DelEntryRdn,
                        slots::ENTRY_DN_OR_RDN,
                        old_dn.into_bytes(),
                        entry.id.to_be_bytes().to_vec(),
                    ));
                    queue.push(WriteOp::new(
                        Action::AddEntryRdn,
                        slots::ENTRY_DN_OR_RDN,
                        new_dn.into_bytes(),
                        entry.id.to_be_bytes().to_vec(),
                    ));
                    Ok(())
                })
            })()
        } else {
            Ok(())
        };
        if let Err(e) = &result {
            error!(error = %e, "upgrade-dn scan failed, aborting job");
            self.abort.store(true, Ordering::Release);
        }

        let _ = push_sync_control(&queue, Action::Rmdir, slots::ID2ENTRY);
        let _ = push_sync_control(&queue, Action::Rmdir, slots::ENTRY_DN_OR_RDN);
        queue.push(WriteOp::new(Action::Close, slots::ID2ENTRY, Vec::new(), Vec::new()));
        // A lone Close is too small to cross MIN_WEIGHT on its own (§4.2),
        // so the writer's drain would never see it once the two Rmdirs
        // above have already been applied; force one last flush. No
        // matching Rmdir is needed since nothing else touches ID2ENTRY
        // after this.
        let _ = push_sync_control(&queue, Action::Open, slots::ID2ENTRY);

        let writer_result = writer_handle.join().expect("writer thread panicked");
        if let Err(e) = &writer_result {
            error!(error = %e, "writer reported failure");
        }

        let aborted = self.abort.load(Ordering::Acquire);
        info!(aborted, renamed = self.stats.processed.load(Ordering::Relaxed), "upgrade-dn apply finished");

        writer_result?;
        setup_result?;
        result?;

        Ok(JobResult {
            processed: self.stats.processed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            aborted,
            warnings: self.stats.warnings.lock().unwrap().clone(),
        })
    }
}

/// Pushes a synchronous control op (`Open`/`Rmdir`, see `Writer::
/// apply_batch`) and blocks until the writer toggles the slot's
/// delayed-spool state and replies.
fn push_sync_control(queue: &WriteQueue, action: Action, target: TargetSlot) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    let mut op = WriteOp::new(action, target, Vec::new(), Vec::new());
    op.reply = Some(tx);
    let rc = queue.push_sync(op, rx);
    if rc != 0 {
        return Err(DbError::Transient("delayed-slot control op did not commit".into()));
    }
    Ok(())
}

fn wall_clock_seconds() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

pub fn default_spool_dir(db_home: &std::path::Path, instance: &str) -> PathBuf {
    db_home.join(instance)
}
