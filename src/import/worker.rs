//! Workers (§4.7): one per indexed attribute, walking the FIFO behind the
//! foreman and emitting index-update writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::common::EntryId;
use crate::error::Result;
use crate::import::fifo::Fifo;
use crate::import::queue::{Action, WriteOp, WriteQueue};
use crate::import::slots;
use crate::kvstore::KvEnv;

pub struct Worker {
    attribute: String,
    slot_index: usize,
    first_id: EntryId,
    env: Arc<KvEnv>,
    fifo: Arc<Fifo>,
    queue: Arc<WriteQueue>,
    abort: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(attribute: String, env: Arc<KvEnv>, fifo: Arc<Fifo>, queue: Arc<WriteQueue>, abort: Arc<AtomicBool>) -> Worker {
        Worker { attribute, slot_index: 0, first_id: EntryId(1), env, fifo, queue, abort }
    }

    pub fn with_slot_index(mut self, index: usize) -> Worker {
        self.slot_index = index;
        self
    }

    /// Starts the scan at `first_id` instead of EID 1, matching `Producer`
    /// and `Foreman` so a reindex continuation begins where it's told to.
    pub fn with_first_id(mut self, first_id: EntryId) -> Worker {
        self.first_id = first_id;
        self
    }

    pub fn run(&mut self) -> Result<()> {
        info!(attribute = %self.attribute, "worker starting");
        // A pinned read-only transaction for the job's lifetime (§4.7):
        // workers never need to see writes made after they began, only the
        // pre-job state for attribute-presence lookups (substring indexing
        // of existing values is out of scope for a pure bulk-import path).
        let _rtxn = self.env.begin_read()?;

        let mut id = self.first_id;
        loop {
            if self.abort.load(Ordering::Acquire) {
                break;
            }
            if self.caught_up(id) {
                break;
            }
            let guard = self.fifo.fetch(id, true);
            let entry = match &guard.entry {
                Some(e) if !guard.bad_flag => Some(e.clone()),
                _ => None,
            };
            drop(guard);

            if let Some(entry) = entry {
                self.index_entry(&entry);
            }
            self.fifo.release(id);
            id = id.next();
        }

        self.queue.push(WriteOp::new(Action::Close, slots::attr_slot(self.slot_index), Vec::new(), Vec::new()));
        info!(attribute = %self.attribute, "worker finished");
        Ok(())
    }

    fn caught_up(&self, id: EntryId) -> bool {
        let ready = self.fifo.ready_id();
        let trailing = self.fifo.trailing_id();
        trailing != 0 && ready >= trailing && id.0 > trailing
    }

    fn index_entry(&self, entry: &crate::common::Entry) {
        if entry.is_tombstone() {
            // Tombstones only contribute to a fixed minimal index set
            // (§4.7); a generic per-attribute worker has nothing to do for
            // any attribute outside that set.
            return;
        }
        let Some(value) = entry.first_value(&self.attribute) else {
            return;
        };
        self.queue.push(WriteOp::new(
            Action::AddIndex,
            slots::attr_slot(self.slot_index),
            value.to_vec(),
            entry.id.to_be_bytes().to_vec(),
        ));
    }
}
