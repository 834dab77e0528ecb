use std::ops::Bound;

use crate::error::Result;

use super::env::Dbi;

/// The cursor positioning operations from §4.1. `heed` exposes range
/// iterators rather than a raw positional cursor, so `KvCursor` keeps track
/// of the last key/value pair it returned and re-derives the next position
/// with a bounded range query — one extra B-tree descent per step, paid
/// only by the (already sequential, already I/O-bound) foreman/worker scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp<'a> {
    First,
    Last,
    FirstDup,
    LastDup,
    Next,
    NextDup,
    NextNodup,
    Prev,
    PrevDup,
    Set(&'a [u8]),
    SetKey(&'a [u8]),
    SetRange(&'a [u8]),
    GetBoth(&'a [u8], &'a [u8]),
    GetBothRange(&'a [u8], &'a [u8]),
}

pub struct KvCursor {
    dbi: Dbi,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl KvCursor {
    pub fn open(dbi: Dbi) -> KvCursor {
        KvCursor { dbi, current: None }
    }

    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        self.current.as_ref().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Finds the first duplicate value of `key` satisfying `pred`, scanning
    /// in sort order. Returns owned bytes so the result outlives the
    /// `RoTxn`-borrowed iterator.
    fn find_dup(
        &self,
        rtxn: &heed::RoTxn<'_>,
        key: &[u8],
        pred: impl Fn(&[u8]) -> bool,
    ) -> Result<Option<Vec<u8>>> {
        let Some(iter) = self.dbi.database().get_duplicates(rtxn, key)? else {
            return Ok(None);
        };
        for item in iter {
            let (_, value) = item?;
            if pred(value) {
                return Ok(Some(value.to_vec()));
            }
        }
        Ok(None)
    }

    /// Executes one positioning step, returning the new (key, value) pair
    /// if one satisfies the operation, and remembering it for the next
    /// relative move.
    pub fn get(&mut self, rtxn: &heed::RoTxn<'_>, op: CursorOp<'_>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let db = self.dbi.database();
        let found = match op {
            CursorOp::First => db.first(rtxn)?.map(|(k, v)| (k.to_vec(), v.to_vec())),
            CursorOp::Last => db.last(rtxn)?.map(|(k, v)| (k.to_vec(), v.to_vec())),
            CursorOp::FirstDup => match &self.current {
                Some((k, _)) => self.find_dup(rtxn, k, |_| true)?.map(|v| (k.clone(), v)),
                None => None,
            },
            CursorOp::LastDup => match &self.current {
                Some((k, _)) => {
                    let mut last = None;
                    if let Some(iter) = db.get_duplicates(rtxn, k)? {
                        for item in iter {
                            last = Some(item?.1.to_vec());
                        }
                    }
                    last.map(|v| (k.clone(), v))
                }
                None => None,
            },
            CursorOp::Next | CursorOp::NextNodup => match &self.current {
                Some((k, _)) => {
                    let range = (Bound::Excluded(k.as_slice()), Bound::Unbounded);
                    db.range(rtxn, &range)?
                        .next()
                        .transpose()?
                        .map(|(k, v)| (k.to_vec(), v.to_vec()))
                }
                None => db.first(rtxn)?.map(|(k, v)| (k.to_vec(), v.to_vec())),
            },
            CursorOp::NextDup => match &self.current {
                Some((k, d)) => {
                    let d = d.clone();
                    self.find_dup(rtxn, k, |v| v > d.as_slice())?.map(|v| (k.clone(), v))
                }
                None => None,
            },
            CursorOp::Prev | CursorOp::PrevDup => match &self.current {
                Some((k, _)) => {
                    let range = (Bound::Unbounded, Bound::Excluded(k.as_slice()));
                    db.range(rtxn, &range)?
                        .last()
                        .transpose()?
                        .map(|(k, v)| (k.to_vec(), v.to_vec()))
                }
                None => db.last(rtxn)?.map(|(k, v)| (k.to_vec(), v.to_vec())),
            },
            CursorOp::Set(key) | CursorOp::SetKey(key) => {
                db.get(rtxn, key)?.map(|v| (key.to_vec(), v.to_vec()))
            }
            CursorOp::SetRange(key) => {
                let range = (Bound::Included(key), Bound::Unbounded);
                db.range(rtxn, &range)?
                    .next()
                    .transpose()?
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
            }
            CursorOp::GetBoth(key, data) => {
                self.find_dup(rtxn, key, |v| v == data)?.map(|v| (key.to_vec(), v))
            }
            CursorOp::GetBothRange(key, data) => {
                self.find_dup(rtxn, key, |v| v >= data)?.map(|v| (key.to_vec(), v))
            }
        };
        self.current = found.clone();
        Ok(found)
    }

    pub fn close(self) {
        // RAII: dropping releases no engine-level resource beyond the owned
        // `Dbi` handle, but keeping an explicit `close` mirrors §4.1's
        // `cursor_close` and gives the writer an obvious point to flush
        // slot state before the next batch.
    }
}
