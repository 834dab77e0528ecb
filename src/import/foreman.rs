//! Foreman (§4.6): walks the FIFO in ID order, maintains the identity
//! indexes, and is the sole source of truth for which entries the writer
//! has durably recorded in `id2entry`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::common::EntryId;
use crate::config::ImportConfig;
use crate::error::Result;
use crate::import::fifo::Fifo;
use crate::import::job::JobStats;
use crate::import::queue::{Action, WriteOp, WriteQueue};
use crate::import::slots;
use crate::kvstore::KvEnv;

pub struct Foreman {
    env: Arc<KvEnv>,
    fifo: Arc<Fifo>,
    queue: Arc<WriteQueue>,
    abort: Arc<AtomicBool>,
    config: ImportConfig,
    stats: Arc<JobStats>,
    /// DNs this job has already assigned an EID to, consulted before
    /// probing the on-disk identity index (a fresh bulk-import job never
    /// finds a hit there; a reindex job relies on the index instead, see
    /// `reindex.rs`).
    dn_index: HashMap<String, EntryId>,
}

impl Foreman {
    pub fn new(
        env: Arc<KvEnv>,
        fifo: Arc<Fifo>,
        queue: Arc<WriteQueue>,
        abort: Arc<AtomicBool>,
        config: ImportConfig,
        stats: Arc<JobStats>,
    ) -> Foreman {
        Foreman { env, fifo, queue, abort, config, stats, dn_index: HashMap::new() }
    }

    fn parent_dn(dn: &str) -> Option<&str> {
        dn.find(',').map(|idx| &dn[idx + 1..])
    }

    fn is_root_suffix(&self, dn: &str) -> bool {
        self.config.identity.suffixes.iter().any(|s| s.eq_ignore_ascii_case(dn))
    }

    pub fn run(&mut self, first_id: EntryId) -> Result<()> {
        info!("foreman starting");
        let mut id = first_id;
        loop {
            if self.abort.load(Ordering::Acquire) {
                return Ok(());
            }
            if self.producer_done_and_caught_up(id) {
                break;
            }
            let guard = self.fifo.fetch(id, false);
            let entry = match &guard.entry {
                Some(e) => e.clone(),
                None => {
                    drop(guard);
                    if self.producer_done_and_caught_up(id) {
                        break;
                    }
                    continue;
                }
            };
            drop(guard);

            self.process_entry(&entry)?;
            self.fifo.set_ready(id.0, id.0);
            id = id.next();
        }

        for i in 0..self.config.indexed_attributes.len() {
            self.queue.push(WriteOp::new(Action::Close, slots::attr_slot(i), Vec::new(), Vec::new()));
        }
        self.queue.push(WriteOp::new(Action::Close, slots::ID2ENTRY, Vec::new(), Vec::new()));
        info!("foreman finished");
        Ok(())
    }

    fn producer_done_and_caught_up(&self, id: EntryId) -> bool {
        let trailing = self.fifo.trailing_id();
        trailing != 0 && id.0 > trailing
    }

    fn process_entry(&mut self, entry: &crate::common::Entry) -> Result<()> {
        let parent_id = if self.is_root_suffix(&entry.dn) {
            None
        } else {
            match Self::parent_dn(&entry.dn).and_then(|p| self.dn_index.get(p)) {
                Some(id) => Some(*id),
                None => {
                    self.stats.warn(format!("cannot resolve parent of {}, skipping", entry.dn));
                    self.fifo.mark_bad(entry.id);
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        };

        if let Some(existing) = self.dn_index.get(&entry.dn) {
            if *existing != entry.id {
                if self.config.upgrade_dn_format {
                    let renamed = format!("nsuniqueid={},{}", uuid::Uuid::new_v4(), entry.dn);
                    warn!(from = %entry.dn, to = %renamed, "duplicate DN, renaming under upgrade-dn mode");
                    self.dn_index.insert(renamed, entry.id);
                } else {
                    warn!(dn = %entry.dn, "duplicate DN in bulk import, skipping");
                    self.fifo.mark_bad(entry.id);
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        } else {
            self.dn_index.insert(entry.dn.clone(), entry.id);
        }

        let encoded = entry.encode()?;
        let key = entry.id.to_be_bytes();
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let mut op = WriteOp::new(Action::Add, slots::ID2ENTRY, key.to_vec(), encoded);
        op.reply = Some(tx);
        let rc = self.queue.push_sync(op, rx);
        if rc != 0 {
            return Err(crate::error::DbError::Transient("id2entry write did not commit".into()));
        }

        self.queue.push(WriteOp::new(
            Action::AddEntryRdn,
            slots::ENTRY_DN_OR_RDN,
            entry.dn.clone().into_bytes(),
            entry.id.to_be_bytes().to_vec(),
        ));

        if let Some(pid) = parent_id {
            self.queue.push(WriteOp::new(
                Action::AddIndex,
                slots::PARENT_ID,
                pid.to_be_bytes().to_vec(),
                entry.id.to_be_bytes().to_vec(),
            ));
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
