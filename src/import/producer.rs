//! Producer (§4.5): turns LDIF records into `Entry` values and feeds the
//! FIFO ring in declared order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::common::{Entry, EntryFlags, EntryId};
use crate::config::ImportConfig;
use crate::contracts::SchemaChecker;
use crate::error::Result;
use crate::import::fifo::Fifo;
use crate::import::ldif::{LdifSource, RawLdifRecord};
use crate::import::job::JobStats;

/// Runs one producer pass over every configured LDIF file (or stdin),
/// pushing decoded entries to `fifo` in order. Returns once all sources are
/// exhausted or the job aborts.
pub struct Producer<'a> {
    config: &'a ImportConfig,
    fifo: Arc<Fifo>,
    schema: &'a dyn SchemaChecker,
    stats: Arc<JobStats>,
    abort: Arc<std::sync::atomic::AtomicBool>,
    next_eid: AtomicU32,
}

impl<'a> Producer<'a> {
    pub fn new(
        config: &'a ImportConfig,
        fifo: Arc<Fifo>,
        schema: &'a dyn SchemaChecker,
        stats: Arc<JobStats>,
        abort: Arc<std::sync::atomic::AtomicBool>,
        first_id: u32,
    ) -> Producer<'a> {
        Producer { config, fifo, schema, stats, abort, next_eid: AtomicU32::new(first_id) }
    }

    pub fn run(&self, source: &mut dyn LdifSource, source_name: &str) -> Result<()> {
        info!(source = source_name, "producer starting");
        let mut processed: u64 = 0;
        loop {
            if self.abort.load(Ordering::Acquire) {
                break;
            }
            let record = match source.next_record()? {
                Some(r) => r,
                None => break,
            };
            match self.process_record(record, source_name) {
                Ok(true) => processed += 1,
                Ok(false) => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(error = %e, source = source_name, "producer skipping entry");
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        info!(source = source_name, processed, "producer finished");
        Ok(())
    }

    fn in_scope(&self, dn: &str) -> bool {
        if !self.config.include_subtrees.is_empty()
            && !self.config.include_subtrees.iter().any(|s| dn_within(dn, s))
        {
            return false;
        }
        !self.config.exclude_subtrees.iter().any(|s| dn_within(dn, s))
    }

    /// Returns `Ok(true)` if the entry was enqueued, `Ok(false)` if it was
    /// silently out-of-scope, `Err` for a schema/syntax failure.
    fn process_record(&self, record: RawLdifRecord, source_name: &str) -> Result<bool> {
        if !self.in_scope(&record.dn) {
            return Ok(false);
        }

        let id = EntryId(self.next_eid.fetch_add(1, Ordering::AcqRel));
        let mut entry = Entry::new(id, record.dn.clone());

        let mut grouped: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        let mut is_tombstone = false;
        for attr in &record.attrs {
            let lname = attr.name.to_ascii_lowercase();
            if lname == "objectclass" && attr.value == b"nsTombstone" {
                is_tombstone = true;
            }
            grouped.entry(lname).or_default().push(attr.value.clone());
        }
        for (name, values) in grouped {
            // Without a live schema subsystem we treat every attribute as
            // multi-valued; `SchemaChecker` below is the seam a real
            // deployment uses to reject (not silently coerce) the handful
            // of attributes that must be single-valued.
            entry.set_attr_values(&name, values, false);
        }
        if is_tombstone {
            entry.flags |= EntryFlags::TOMBSTONE;
        }

        if let Err(violation) = self.schema.check_entry(&entry) {
            self.stats.warn(format!("schema violation for {}: {violation}", entry.dn));
            return Err(crate::error::DbError::SchemaViolation(violation));
        }

        if self.config.generate_uniqueid && entry.first_value("nsuniqueid").is_none() {
            let uid = uuid::Uuid::new_v4().to_string();
            entry.set_attr_values("nsuniqueid", vec![uid.into_bytes()], true);
        }

        let encoded = entry.encode()?;
        let size = encoded.len();
        if !self.fifo.fit_or_expand(size) {
            self.stats.warn(format!("entry {} exceeds FIFO capacity, skipping", entry.dn));
            return Ok(false);
        }
        self.fifo.wait_for_space(size);
        self.fifo.store(entry, size, source_name, record.source_line);
        Ok(true)
    }
}

/// Crude but dependency-free subtree containment check: `dn` is within
/// `base` iff it equals `base` or ends with `,<base>` (case-insensitive).
fn dn_within(dn: &str, base: &str) -> bool {
    dn.eq_ignore_ascii_case(base) || dn.to_ascii_lowercase().ends_with(&format!(",{}", base.to_ascii_lowercase()))
}
