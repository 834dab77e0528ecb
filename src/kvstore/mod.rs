//! Thin abstraction over an ordered key/value store with transactions,
//! cursors, and duplicate-sorted keys (§4.1).
//!
//! Backed by [`heed`], a safe LMDB binding. `heed::Env::write_txn` already
//! serialises writers through an internal mutex, so the single-writer
//! invariant (I3) holds at the type level: there is no separate lock above
//! it, exactly as §4.1 requires.

mod cursor;
mod env;

pub use cursor::{CursorOp, KvCursor};
pub use env::{Dbi, DbiFlags, KvEnv, PutFlags};

use heed::types::Bytes;

/// The byte-string codec used for every database this crate opens. Keys are
/// either raw DNs/attribute values or big-endian EIDs; values are opaque
/// blobs (encoded entries, IDLs, VLV records).
pub type KvDatabase = heed::Database<Bytes, Bytes>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_put_get_commit_round_trips() {
        let dir = tempdir().unwrap();
        let env = KvEnv::open(dir.path(), 16).unwrap();

        let mut wtxn = env.begin_write().unwrap();
        let db = env.open_dbi(&mut wtxn, "id2entry", DbiFlags::CREATE).unwrap();
        db.put(&mut wtxn, b"k1", b"v1").unwrap();
        wtxn.commit().unwrap();

        let rtxn = env.begin_read().unwrap();
        let db = env.open_dbi_ro(&rtxn, "id2entry").unwrap();
        assert_eq!(db.get(&rtxn, b"k1").unwrap(), Some(&b"v1"[..]));
    }

    #[test]
    fn only_one_write_txn_live_at_a_time() {
        // heed::RwTxn borrows &mut Env semantics via an internal mutex:
        // attempting a second write_txn from the same thread while the
        // first is open would deadlock, which is exactly property P3.
        let dir = tempdir().unwrap();
        let env = KvEnv::open(dir.path(), 4).unwrap();
        let wtxn = env.begin_write().unwrap();
        drop(wtxn);
        let wtxn2 = env.begin_write().unwrap();
        wtxn2.commit().unwrap();
    }
}
