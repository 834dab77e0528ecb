//! Shared primitives used by both the import pipeline (Core A) and the
//! entry resolver / ACL evaluator (Core B).

pub mod bounded_map;
pub mod csn;
pub mod entry;
pub mod plist;

pub use bounded_map::BoundedHashMap;
pub use csn::{Csn, CsnGenerator, ReplicaId};
pub use entry::{
    AttributeState, Entry, EntryFlags, EntryId, MultiValuedAttribute, SingleValuedAttribute, Value,
};
pub use plist::{Plist, PlistSlot, PlistValue};
