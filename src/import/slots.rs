//! Well-known per-table slot indices (§3 "Writer global context"),
//! agreed on by the foreman, every worker, and the writer without any
//! runtime negotiation since the set of tables is fixed for a job's
//! duration.

use super::queue::TargetSlot;

pub const ID2ENTRY: TargetSlot = TargetSlot(0);
pub const ENTRY_DN_OR_RDN: TargetSlot = TargetSlot(1);
pub const PARENT_ID: TargetSlot = TargetSlot(2);
/// First slot index handed out to per-attribute index tables; the worker
/// for indexed attribute `i` (in `config.indexed_attributes` order) owns
/// `TargetSlot(FIRST_ATTR_SLOT + i)`.
pub const FIRST_ATTR_SLOT: usize = 3;

pub fn attr_slot(index: usize) -> TargetSlot {
    TargetSlot(FIRST_ATTR_SLOT + index)
}

/// Number of subordinate IDs a `parentid` key may accumulate before the
/// per-parent list is considered not worth maintaining individually and
/// the subordinate-count accumulator is notified (§4.6 step 4).
pub const ALLIDS_THRESHOLD: u32 = 4000;

/// Outcome of inserting one more ID into a `parentid` key's duplicate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlDisposition {
    /// Below the threshold; the list is still maintained normally.
    Normal,
    /// This insert is the one that crossed the threshold.
    NowAllIds,
    /// The list was already past the threshold before this insert.
    AllIds,
}

pub fn dbi_name_for_slot(slot: TargetSlot, indexed_attributes: &[String]) -> Option<String> {
    match slot {
        ID2ENTRY => Some("id2entry".to_string()),
        ENTRY_DN_OR_RDN => Some("entryrdn".to_string()),
        PARENT_ID => Some("parentid".to_string()),
        TargetSlot(n) if n >= FIRST_ATTR_SLOT => {
            indexed_attributes.get(n - FIRST_ATTR_SLOT).map(|a| format!("{a}.db"))
        }
        _ => None,
    }
}
