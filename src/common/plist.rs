//! Property lists: an ordered name→value map used to carry a request's
//! subject and resource attributes into the ACL evaluator.
//!
//! A small, fixed set of attributes (subject DN, resource DN, bind method,
//! …) is looked up on nearly every evaluation, so those get a dedicated
//! array slot; everything else falls back to a string-keyed map. This
//! mirrors the donor's `pool::session` state maps, which split a
//! fixed-index fast path from a free-form `HashMap` tail.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Hot-path attribute slots, looked up in O(1) without hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlistSlot {
    SubjectDn = 0,
    ResourceDn = 1,
    BindMethod = 2,
    ClientIp = 3,
    ClientDns = 4,
    Database = 5,
}

const SLOT_COUNT: usize = 6;
const SLOT_NAMES: [&str; SLOT_COUNT] = ["subject_dn", "resource_dn", "bind_method", "ip", "dns", "dbname"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlistValue {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl PlistValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PlistValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for PlistValue {
    fn from(s: &str) -> Self {
        PlistValue::Str(s.to_string())
    }
}

impl From<String> for PlistValue {
    fn from(s: String) -> Self {
        PlistValue::Str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plist {
    slots: [Option<PlistValue>; SLOT_COUNT],
    extra: HashMap<String, PlistValue>,
}

impl Plist {
    pub fn new() -> Self {
        Plist {
            slots: Default::default(),
            extra: HashMap::new(),
        }
    }

    pub fn set_slot(&mut self, slot: PlistSlot, value: impl Into<PlistValue>) {
        self.slots[slot as usize] = Some(value.into());
    }

    pub fn get_slot(&self, slot: PlistSlot) -> Option<&PlistValue> {
        self.slots[slot as usize].as_ref()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PlistValue>) {
        let name = name.into();
        if let Some(slot) = Self::name_to_slot(&name) {
            self.set_slot(slot, value);
        } else {
            self.extra.insert(name, value.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<&PlistValue> {
        if let Some(slot) = Self::name_to_slot(name) {
            self.get_slot(slot)
        } else {
            self.extra.get(name)
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PlistValue::as_str)
    }

    fn name_to_slot(name: &str) -> Option<PlistSlot> {
        match name {
            "subject_dn" | "user" => Some(PlistSlot::SubjectDn),
            "resource_dn" => Some(PlistSlot::ResourceDn),
            "bind_method" | "authmethod" => Some(PlistSlot::BindMethod),
            "ip" => Some(PlistSlot::ClientIp),
            "dns" => Some(PlistSlot::ClientDns),
            "dbname" | "database" => Some(PlistSlot::Database),
            _ => None,
        }
    }

    /// Explicit deep copy, matching the donor convention that plists are
    /// scoped to one request and duplicated rather than shared when a
    /// compiled clause needs its own snapshot (see the ACL AUTH clause
    /// snapshotting rule).
    pub fn duplicate(&self) -> Plist {
        self.clone()
    }

    /// Iterates every populated attribute, hot-path slots first under
    /// their canonical name, used by the ACL compiler to copy an AUTH
    /// clause's parameters into the running auth plist.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlistValue)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|val| (SLOT_NAMES[i], val)))
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v)))
    }
}
