//! Write queue: the single channel through which every mutating thread
//! (foreman, workers) hands ops to the writer (§4.2).
//!
//! Byte-weighted watermarks mirror the donor's buffer-pool eviction
//! thresholds (see `memory::buffer_pool`) more than a plain bounded channel:
//! backpressure should track how much work is actually pending, not how
//! many ops are queued, since a single `ADD` carrying a 200 KiB entry blob
//! weighs as much as 800 tiny index updates.

use std::collections::VecDeque;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Minimum weight charged to any op, so that a flood of zero-byte index
/// deletes still advances `weight_in` and eventually triggers a drain.
pub const BASE_WEIGHT: u64 = 256;
/// Start draining once occupancy reaches this many bytes.
pub const MIN_WEIGHT: u64 = MAX_WEIGHT / 4;
/// Block non-sync pushers once occupancy reaches this many bytes.
pub const MAX_WEIGHT: u64 = 256 * 1024;

/// A target database/index a write op is destined for, resolved by the
/// writer to a concrete `Dbi` via the job's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSlot(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    AddIndex,
    DelIndex,
    AddVlv,
    DelVlv,
    AddEntryRdn,
    DelEntryRdn,
    Rmdir,
    Open,
    Close,
}

/// One write-queue element (§3 "Write-queue element").
pub struct WriteOp {
    pub action: Action,
    pub target: TargetSlot,
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub weight: u64,
    /// Present only for synchronous ops; the writer replies on it after
    /// commit. `0` on success, `-1` if the job aborted before the op was
    /// ever applied.
    pub reply: Option<SyncSender<i32>>,
}

impl WriteOp {
    pub fn new(action: Action, target: TargetSlot, key: Vec<u8>, data: Vec<u8>) -> WriteOp {
        let weight = BASE_WEIGHT.max((key.len() + data.len()) as u64);
        WriteOp { action, target, key, data, weight, reply: None }
    }

    pub fn is_sync(&self) -> bool {
        self.reply.is_some()
    }
}

#[derive(Default)]
struct QueueState {
    elements: VecDeque<WriteOp>,
    weight_in: u64,
    weight_out: u64,
    flush_queue: bool,
    aborted: bool,
    /// True while a synchronous op is live (inserted, not yet drained and
    /// replied to); a second sync push blocks behind this.
    sync_in_flight: bool,
}

/// The write queue (§4.2). One instance per import job, shared by every
/// producing thread and drained exclusively by the writer.
pub struct WriteQueue {
    state: Mutex<QueueState>,
    data_available: Condvar,
    queue_full: Condvar,
    sync_free: Condvar,
}

impl WriteQueue {
    pub fn new() -> WriteQueue {
        WriteQueue {
            state: Mutex::new(QueueState::default()),
            data_available: Condvar::new(),
            queue_full: Condvar::new(),
            sync_free: Condvar::new(),
        }
    }

    /// Pushes a non-synchronous op, blocking while occupancy is at or above
    /// `MAX_WEIGHT` (P5), unless the queue has been aborted.
    pub fn push(&self, op: WriteOp) {
        debug_assert!(!op.is_sync(), "use push_sync for synchronous ops");
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return;
            }
            if state.weight_in.saturating_sub(state.weight_out) < MAX_WEIGHT {
                break;
            }
            self.queue_full.wait_for(&mut state, Duration::from_millis(10));
        }
        state.weight_in += op.weight;
        let crossed_min = state.weight_in.saturating_sub(state.weight_out) >= MIN_WEIGHT;
        state.elements.push_back(op);
        if crossed_min || state.flush_queue {
            self.data_available.notify_all();
        }
    }

    /// Pushes a synchronous op at the head of the queue and blocks the
    /// caller on its own reply channel until the writer commits and
    /// replies (I4). Returns the `rc` the writer sent, or `-1` if the job
    /// aborted before a reply arrived.
    pub fn push_sync(&self, mut op: WriteOp, reply_rx: std::sync::mpsc::Receiver<i32>) -> i32 {
        {
            let mut state = self.state.lock();
            while state.sync_in_flight && !state.aborted {
                self.sync_free.wait(&mut state);
            }
            if state.aborted {
                return -1;
            }
            state.sync_in_flight = true;
            state.flush_queue = true;
            op.weight = op.weight.max(BASE_WEIGHT);
            state.weight_in += op.weight;
            state.elements.push_front(op);
            self.data_available.notify_all();
        }
        reply_rx.recv().unwrap_or(-1)
    }

    /// Drains the queue, returning everything currently enqueued once
    /// occupancy reaches `MIN_WEIGHT` or `flush_queue` is set.
    pub fn drain(&self) -> Vec<WriteOp> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                break;
            }
            let occupancy = state.weight_in.saturating_sub(state.weight_out);
            if occupancy >= MIN_WEIGHT || state.flush_queue {
                break;
            }
            self.data_available.wait_for(&mut state, Duration::from_millis(10));
        }
        let drained: Vec<WriteOp> = state.elements.drain(..).collect();
        state.weight_out = state.weight_in;
        state.flush_queue = false;
        self.queue_full.notify_all();
        drained
    }

    /// Marks every sync op in `drained` as no longer in flight and wakes
    /// the next sync pusher, if any. Called by the writer after replying.
    pub fn release_sync(&self) {
        let mut state = self.state.lock();
        state.sync_in_flight = false;
        self.sync_free.notify_one();
    }

    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.elements.clear();
        self.data_available.notify_all();
        self.queue_full.notify_all();
        self.sync_free.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Progress fraction snapshot, `weight_out / weight_in`.
    pub fn progress(&self) -> f64 {
        let state = self.state.lock();
        if state.weight_in == 0 {
            1.0
        } else {
            state.weight_out as f64 / state.weight_in as f64
        }
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        WriteQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn op(weight: usize) -> WriteOp {
        WriteOp::new(Action::Add, TargetSlot(0), vec![0u8; weight], Vec::new())
    }

    #[test]
    fn drain_returns_once_min_weight_reached() {
        let q = WriteQueue::new();
        q.push(op(MIN_WEIGHT as usize));
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn push_blocks_at_max_weight_until_drain() {
        let q = Arc::new(WriteQueue::new());
        // Fill past MAX_WEIGHT without draining.
        for _ in 0..4 {
            q.push(op((MAX_WEIGHT / 4) as usize));
        }
        let q2 = q.clone();
        let blocked = thread::spawn(move || {
            q2.push(op(BASE_WEIGHT as usize));
        });
        thread::sleep(Duration::from_millis(30));
        assert!(!blocked.is_finished());
        q.drain();
        blocked.join().unwrap();
    }

    #[test]
    fn abort_releases_blocked_pushers() {
        let q = Arc::new(WriteQueue::new());
        for _ in 0..4 {
            q.push(op((MAX_WEIGHT / 4) as usize));
        }
        let q2 = q.clone();
        let blocked = thread::spawn(move || {
            q2.push(op(BASE_WEIGHT as usize));
        });
        thread::sleep(Duration::from_millis(30));
        q.abort();
        blocked.join().unwrap();
    }

    #[test]
    fn second_sync_op_waits_for_first_to_release() {
        let q = Arc::new(WriteQueue::new());
        let (tx1, rx1) = std::sync::mpsc::sync_channel(1);
        let mut sync_op = op(BASE_WEIGHT as usize);
        sync_op.reply = Some(tx1);
        let q2 = q.clone();
        let h = thread::spawn(move || q2.push_sync(sync_op, rx1));

        thread::sleep(Duration::from_millis(20));
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        drained[0].reply.as_ref().unwrap().send(0).unwrap();
        q.release_sync();
        assert_eq!(h.join().unwrap(), 0);
    }
}
