//! Entry identifiers and the in-memory decoded entry shared by the import
//! pipeline and the entry state resolver.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::csn::Csn;

/// 32-bit monotonic entry identifier. `0` is reserved and never assigned to
/// a real entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u32);

impl EntryId {
    pub const RESERVED: EntryId = EntryId(0);

    pub fn next(self) -> EntryId {
        EntryId(self.0 + 1)
    }

    /// Big-endian key encoding used for every EID-keyed database.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> EntryId {
        EntryId(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Per-entry flag bits carried alongside the decoded record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EntryFlags: u32 {
        const TOMBSTONE       = 0b0000_0001;
        const COMPAT_DN       = 0b0000_0010;
        const BAD             = 0b0000_0100;
        const SUBTREE_RENAMED = 0b0000_1000;
    }
}

/// A single attribute value plus its change-sequence-number bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub data: Vec<u8>,
    /// value-updated CSN: when this value was last (re)asserted present.
    pub vucsn: Option<Csn>,
    /// value-deleted CSN: when this value was marked for deletion.
    pub vdcsn: Option<Csn>,
    /// value-distinguished CSN: the value was part of the entry's RDN as of
    /// this CSN (used to protect RDN values from deletion races).
    pub vdncsn: Option<Csn>,
}

impl Value {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Value {
            data: data.into(),
            vucsn: None,
            vdcsn: None,
            vdncsn: None,
        }
    }

    pub fn with_vucsn(mut self, csn: Csn) -> Self {
        self.vucsn = Some(csn);
        self
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Was this value distinguished (part of the RDN) at or before `csn`?
    pub fn distinguished_at(&self, csn: Csn) -> bool {
        matches!(self.vdncsn, Some(d) if d <= csn)
    }
}

/// A multi-valued attribute: present values plus a parallel deleted set,
/// each entry carrying its own CSNs (see §4.10 of the design).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiValuedAttribute {
    pub name: String,
    pub present: Vec<Value>,
    pub deleted: Vec<Value>,
    /// attribute-deletion CSN: the whole attribute was deleted at this CSN.
    pub adcsn: Option<Csn>,
}

impl MultiValuedAttribute {
    pub fn new(name: impl Into<String>) -> Self {
        MultiValuedAttribute {
            name: name.into(),
            present: Vec::new(),
            deleted: Vec::new(),
            adcsn: None,
        }
    }

    pub fn is_empty_present(&self) -> bool {
        self.present.is_empty()
    }
}

/// A single-valued attribute modelled as the compressed `(current, pending,
/// deletion-csn)` state from §4.10.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SingleValuedAttribute {
    pub name: String,
    pub current: Option<Value>,
    pub pending: Option<Value>,
    pub deletion_csn: Option<Csn>,
}

impl SingleValuedAttribute {
    pub fn new(name: impl Into<String>) -> Self {
        SingleValuedAttribute {
            name: name.into(),
            current: None,
            pending: None,
            deletion_csn: None,
        }
    }
}

/// Either attribute shape, keyed by lower-cased attribute name at the
/// `Entry` level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttributeState {
    Multi(MultiValuedAttribute),
    Single(SingleValuedAttribute),
}

impl AttributeState {
    pub fn name(&self) -> &str {
        match self {
            AttributeState::Multi(a) => &a.name,
            AttributeState::Single(a) => &a.name,
        }
    }
}

/// In-memory decoded directory entry: the unit of work passed through the
/// FIFO ring and mutated in place by the entry resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub dn: String,
    pub parent_id: Option<EntryId>,
    pub attributes: HashMap<String, AttributeState>,
    pub flags: EntryFlags,
}

impl Entry {
    pub fn new(id: EntryId, dn: impl Into<String>) -> Self {
        Entry {
            id,
            dn: dn.into(),
            parent_id: None,
            attributes: HashMap::new(),
            flags: EntryFlags::empty(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(EntryFlags::TOMBSTONE)
    }

    pub fn set_attr_values(&mut self, name: &str, values: Vec<Vec<u8>>, single_valued: bool) {
        let key = name.to_ascii_lowercase();
        if single_valued {
            let mut attr = SingleValuedAttribute::new(name);
            attr.current = values.into_iter().next().map(Value::new);
            self.attributes.insert(key, AttributeState::Single(attr));
        } else {
            let mut attr = MultiValuedAttribute::new(name);
            attr.present = values.into_iter().map(Value::new).collect();
            self.attributes.insert(key, AttributeState::Multi(attr));
        }
    }

    pub fn first_value(&self, name: &str) -> Option<&[u8]> {
        match self.attributes.get(&name.to_ascii_lowercase())? {
            AttributeState::Multi(a) => a.present.first().map(|v| v.data.as_slice()),
            AttributeState::Single(a) => a.current.as_ref().map(|v| v.data.as_slice()),
        }
    }

    pub fn first_value_str(&self, name: &str) -> Option<String> {
        self.first_value(name)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Serialises the entry to a stable byte blob for storage in
    /// `id2entry`. Uses `serde_json` rather than a bespoke binary format so
    /// the blob is human-inspectable in tests and backups.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Entry> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_through_encode_decode() {
        let mut e = Entry::new(EntryId(2), "uid=bob,dc=x");
        e.set_attr_values("objectClass", vec![b"top".to_vec(), b"person".to_vec()], false);
        e.set_attr_values("cn", vec![b"Bob".to_vec()], true);

        let blob = e.encode().unwrap();
        let back = Entry::decode(&blob).unwrap();
        assert_eq!(back.dn, "uid=bob,dc=x");
        assert_eq!(back.first_value_str("cn").as_deref(), Some("Bob"));
    }

    #[test]
    fn eid_be_bytes_round_trip() {
        let id = EntryId(0x01020304);
        assert_eq!(EntryId::from_be_bytes(id.to_be_bytes()), id);
    }
}
