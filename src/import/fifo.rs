//! Bounded FIFO entry ring (§4.4).
//!
//! A `Vec<Mutex<FifoSlot>>` arena rather than the source's raw pointer ring:
//! workers borrow a slot behind its own mutex for the brief window needed to
//! read the entry, instead of holding a pointer across the whole job.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::{Entry, EntryId};

/// Default ring capacity in bytes before `fit_or_expand` grows it.
pub const DEFAULT_CAPACITY_BYTES: usize = 4 * 1024 * 1024;
/// Hard ceiling on ring growth; entries larger than this are skipped
/// rather than triggering unbounded reallocation.
pub const MAX_CAPACITY_BYTES: usize = 64 * 1024 * 1024;

pub struct FifoSlot {
    pub entry: Option<Entry>,
    pub byte_size: usize,
    pub source_filename: String,
    pub source_line: u64,
    pub bad_flag: bool,
    pub refcount: u32,
}

impl FifoSlot {
    fn empty() -> FifoSlot {
        FifoSlot {
            entry: None,
            byte_size: 0,
            source_filename: String::new(),
            source_line: 0,
            bad_flag: false,
            refcount: 0,
        }
    }
}

/// The bounded entry ring shared by producer, foreman, and workers.
pub struct Fifo {
    slots: Vec<Mutex<FifoSlot>>,
    capacity_bytes: Mutex<usize>,
    occupancy_bytes: Mutex<usize>,
    number_indexers: u32,

    lead_id: AtomicU32,
    trailing_id: AtomicU32,
    ready_id: AtomicU32,
    ready_eid: AtomicU32,

    space_available: Condvar,
    entry_ready: Condvar,
    space_lock: Mutex<()>,
}

impl Fifo {
    /// `ring_len` is the slot count (determines foreman-to-worker lag);
    /// `number_indexers` is how many workers must decrement refcount
    /// before a slot becomes reusable.
    pub fn new(ring_len: usize, number_indexers: u32) -> Fifo {
        let mut slots = Vec::with_capacity(ring_len);
        for _ in 0..ring_len {
            slots.push(Mutex::new(FifoSlot::empty()));
        }
        Fifo {
            slots,
            capacity_bytes: Mutex::new(DEFAULT_CAPACITY_BYTES),
            occupancy_bytes: Mutex::new(0),
            number_indexers,
            lead_id: AtomicU32::new(0),
            trailing_id: AtomicU32::new(0),
            ready_id: AtomicU32::new(0),
            ready_eid: AtomicU32::new(0),
            space_available: Condvar::new(),
            entry_ready: Condvar::new(),
            space_lock: Mutex::new(()),
        }
    }

    fn index_of(&self, id: EntryId) -> usize {
        (id.0 as usize) % self.slots.len()
    }

    pub fn lead_id(&self) -> u32 {
        self.lead_id.load(Ordering::Acquire)
    }

    pub fn ready_id(&self) -> u32 {
        self.ready_id.load(Ordering::Acquire)
    }

    pub fn ready_eid(&self) -> u32 {
        self.ready_eid.load(Ordering::Acquire)
    }

    pub fn trailing_id(&self) -> u32 {
        self.trailing_id.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, id: u32, eid: u32) {
        self.ready_id.store(id, Ordering::Release);
        self.ready_eid.store(eid, Ordering::Release);
        self.entry_ready.notify_all();
    }

    /// Returns `true` if `desired_bytes` fits after growing capacity (up to
    /// `MAX_CAPACITY_BYTES`); `false` means the caller should skip this
    /// entry as too large.
    pub fn fit_or_expand(&self, desired_bytes: usize) -> bool {
        let mut cap = self.capacity_bytes.lock();
        if desired_bytes <= *cap {
            return true;
        }
        if desired_bytes > MAX_CAPACITY_BYTES {
            return false;
        }
        *cap = desired_bytes.next_power_of_two().min(MAX_CAPACITY_BYTES);
        true
    }

    /// Frees slots whose entry has refcount 0 and id ≤ `ready_eid`, then
    /// blocks (busy-wait with bounded sleep) until at least `desired_bytes`
    /// is free.
    pub fn wait_for_space(&self, desired_bytes: usize) {
        loop {
            let freed = self.reclaim_free_slots();
            let occ = *self.occupancy_bytes.lock();
            let cap = *self.capacity_bytes.lock();
            if occ + desired_bytes <= cap {
                return;
            }
            if freed == 0 {
                let mut guard = self.space_lock.lock();
                self.space_available.wait_for(&mut guard, Duration::from_millis(10));
            }
        }
    }

    fn reclaim_free_slots(&self) -> usize {
        let ready_eid = self.ready_eid();
        let mut freed = 0;
        for slot in &self.slots {
            let mut s = slot.lock();
            if let Some(entry) = &s.entry {
                if s.refcount == 0 && entry.id.0 <= ready_eid {
                    *self.occupancy_bytes.lock() -= s.byte_size;
                    s.entry = None;
                    s.byte_size = 0;
                    s.bad_flag = false;
                    freed += 1;
                }
            }
        }
        if freed > 0 {
            self.space_available.notify_all();
        }
        freed
    }

    /// Producer-side: stores `entry` at its slot and advances `lead_id`/
    /// `trailing_id`.
    pub fn store(&self, entry: Entry, byte_size: usize, source_filename: &str, source_line: u64) {
        let id = entry.id;
        let idx = self.index_of(id);
        {
            let mut slot = self.slots[idx].lock();
            slot.entry = Some(entry);
            slot.byte_size = byte_size;
            slot.source_filename = source_filename.to_string();
            slot.source_line = source_line;
            slot.bad_flag = false;
            slot.refcount = self.number_indexers;
        }
        *self.occupancy_bytes.lock() += byte_size;
        self.lead_id.store(id.0, Ordering::Release);
        self.trailing_id.fetch_max(id.0, Ordering::AcqRel);
        self.entry_ready.notify_all();
    }

    /// Busy-waits (bounded sleep) until `id` has been placed by the
    /// producer and, for workers, approved by the foreman, then locks and
    /// returns the slot guard.
    pub fn fetch(&self, id: EntryId, for_worker: bool) -> parking_lot::MutexGuard<'_, FifoSlot> {
        loop {
            let visible = if for_worker {
                id.0 <= self.ready_id()
            } else {
                id.0 <= self.lead_id()
            };
            if visible {
                return self.slots[self.index_of(id)].lock();
            }
            let mut guard = self.space_lock.lock();
            self.entry_ready.wait_for(&mut guard, Duration::from_millis(10));
        }
    }

    pub fn mark_bad(&self, id: EntryId) {
        self.slots[self.index_of(id)].lock().bad_flag = true;
    }

    /// Called by a worker after it finishes with an entry.
    pub fn release(&self, id: EntryId) {
        let idx = self.index_of(id);
        let mut slot = self.slots[idx].lock();
        slot.refcount = slot.refcount.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32) -> Entry {
        Entry::new(EntryId(id), format!("uid=u{id},dc=x"))
    }

    #[test]
    fn store_and_fetch_round_trips() {
        let fifo = Fifo::new(8, 1);
        fifo.store(entry(1), 64, "test.ldif", 1);
        fifo.set_ready(1, 1);
        let slot = fifo.fetch(EntryId(1), true);
        assert_eq!(slot.entry.as_ref().unwrap().id, EntryId(1));
    }

    #[test]
    fn slot_reclaimed_only_after_refcount_zero_and_past_ready_eid() {
        let fifo = Fifo::new(4, 1);
        fifo.store(entry(1), 64, "test.ldif", 1);
        // Not yet ready: refcount is 1, ready_eid is 0.
        assert_eq!(fifo.reclaim_free_slots(), 0);
        fifo.release(EntryId(1));
        fifo.set_ready(1, 1);
        assert_eq!(fifo.reclaim_free_slots(), 1);
    }

    #[test]
    fn fit_or_expand_rejects_oversize_entries() {
        let fifo = Fifo::new(4, 1);
        assert!(!fifo.fit_or_expand(MAX_CAPACITY_BYTES + 1));
    }
}
