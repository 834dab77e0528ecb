//! Entry state resolver (Core B-1, §4.10): reconciles concurrent updates
//! to an entry's attribute values using per-value change sequence numbers.

use crate::common::csn::Csn;
use crate::common::entry::{AttributeState, Entry, MultiValuedAttribute, SingleValuedAttribute, Value};

/// One pending modification, as it would arrive off the wire from a
/// replicated operation. `csn` is `None` for mods within an operation that
/// share the operation's base CSN and need a subsequence assigned (see
/// [`apply_modifications_with_csn`]).
pub struct Modification {
    pub attr_name: String,
    pub mod_type: ModType,
    pub value: Option<Vec<u8>>,
    pub csn: Option<Csn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    Add,
    Delete,
    Replace,
}

/// Assigns a sub-sequence-bumped CSN to every mod in `mods` that arrived
/// without one, guaranteeing absolute ordering across mods within a single
/// replicated operation (§4.10, final paragraph).
pub fn apply_modifications_with_csn(mods: &mut [Modification], base_csn: Csn) {
    let mut subseq: u16 = 0;
    for m in mods.iter_mut() {
        if m.csn.is_none() {
            subseq += 1;
            m.csn = Some(base_csn.with_subseq(subseq));
        }
    }
}

/// Reconciles a multi-valued attribute's present/deleted sets (§4.10,
/// "Multi-valued"). `is_delete_all` mirrors the single-valued resolver's
/// caller-supplied flag: it only matters on the knife-edge case where
/// `max(vdcsn, adcsn) == vucsn`.
pub fn resolve_multi_valued(attr: &mut MultiValuedAttribute, is_delete_all: bool) {
    for v in attr.present.iter_mut() {
        purge_stale_deletion(v);
    }

    let mut newly_deleted = Vec::new();
    let adcsn = attr.adcsn;
    attr.present.retain(|v| {
        let vucsn = v.vucsn.unwrap_or(Csn::ZERO);
        let threshold = max_opt(v.vdcsn, adcsn);
        let should_delete = match threshold {
            Some(t) if t > vucsn => true,
            Some(t) if t == vucsn && is_delete_all => true,
            _ => false,
        };
        if should_delete {
            let effective = threshold.unwrap();
            if v.distinguished_at(effective) {
                true
            } else {
                newly_deleted.push(v.clone());
                false
            }
        } else {
            true
        }
    });
    attr.deleted.extend(newly_deleted);

    let mut resurrected = Vec::new();
    let adcsn = attr.adcsn;
    attr.deleted.retain(|v| {
        let vucsn = v.vucsn.unwrap_or(Csn::ZERO);
        let threshold = max_opt(v.vdcsn, adcsn).unwrap_or(Csn::ZERO);
        if vucsn > threshold {
            resurrected.push(v.clone());
            false
        } else {
            true
        }
    });
    attr.present.extend(resurrected);
}

fn purge_stale_deletion(v: &mut Value) {
    if let Some(vd) = v.vdcsn {
        let effective_update = max_opt(v.vucsn, v.vdncsn);
        if let Some(eu) = effective_update {
            if vd < eu {
                v.vdcsn = None;
            }
        }
    }
}

fn max_opt(a: Option<Csn>, b: Option<Csn>) -> Option<Csn> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Reconciles a single-valued attribute's `(current, pending, deletion)`
/// state against one incoming value (§4.10, "Single-valued").
pub fn apply_single_valued_mod(attr: &mut SingleValuedAttribute, incoming: Value, is_delete_all: bool) {
    let new_vucsn = incoming.vucsn.unwrap_or(Csn::ZERO);
    match &attr.current {
        None => attr.current = Some(incoming),
        Some(current) => {
            let cur_vucsn = current.vucsn.unwrap_or(Csn::ZERO);
            if new_vucsn < cur_vucsn {
                if incoming.distinguished_at(cur_vucsn) {
                    attr.current = Some(incoming);
                }
                // else: stale update, discarded.
            } else if new_vucsn == cur_vucsn && is_delete_all {
                // Knife-edge tie: a delete-all racing the current value's
                // own update wins unless the current value is protected by
                // being part of the RDN, mirroring `resolve_multi_valued`'s
                // `t == vucsn && is_delete_all` branch.
                if current.distinguished_at(new_vucsn) {
                    attr.pending = Some(incoming);
                } else {
                    attr.deletion_csn = Some(new_vucsn);
                    attr.current = None;
                }
            } else if current.distinguished_at(new_vucsn) {
                attr.pending = Some(incoming);
            } else {
                attr.current = Some(incoming);
            }
        }
    }
    if let (Some(dc), Some(current)) = (attr.deletion_csn, &attr.current) {
        let effective = current.vucsn.unwrap_or(Csn::ZERO);
        if dc < effective {
            attr.deletion_csn = None;
        }
    }
}

/// Applies a modification list to a decoded entry in place (§4.10's
/// resolver has no other caller): each mod is routed to the multi- or
/// single-valued resolver depending on the attribute's existing shape, new
/// attributes defaulting to multi-valued as the parser does not carry
/// schema syntax here.
pub fn apply_modifications(entry: &mut Entry, mods: &[Modification]) {
    for m in mods {
        apply_modification(entry, m);
    }
}

fn apply_modification(entry: &mut Entry, m: &Modification) {
    let key = m.attr_name.to_ascii_lowercase();
    let csn = m.csn.unwrap_or(Csn::ZERO);
    let is_delete_all = m.mod_type == ModType::Delete && m.value.is_none();

    let state = entry
        .attributes
        .entry(key)
        .or_insert_with(|| AttributeState::Multi(MultiValuedAttribute::new(m.attr_name.clone())));

    match state {
        AttributeState::Single(attr) => match m.mod_type {
            ModType::Add | ModType::Replace => {
                if let Some(data) = &m.value {
                    let incoming = Value::new(data.clone()).with_vucsn(csn);
                    apply_single_valued_mod(attr, incoming, is_delete_all);
                }
            }
            ModType::Delete => {
                if is_delete_all {
                    attr.deletion_csn = Some(csn);
                    attr.current = None;
                } else if let Some(data) = &m.value {
                    if attr.current.as_ref().map(|v| &v.data) == Some(data) {
                        attr.deletion_csn = Some(csn);
                    }
                }
            }
        },
        AttributeState::Multi(attr) => match m.mod_type {
            ModType::Add => {
                if let Some(data) = &m.value {
                    attr.present.push(Value::new(data.clone()).with_vucsn(csn));
                }
            }
            ModType::Replace => {
                attr.adcsn = Some(csn);
                resolve_multi_valued(attr, true);
                if let Some(data) = &m.value {
                    attr.present.push(Value::new(data.clone()).with_vucsn(csn));
                }
            }
            ModType::Delete => {
                if is_delete_all {
                    attr.adcsn = Some(csn);
                } else if let Some(data) = &m.value {
                    for v in attr.present.iter_mut() {
                        if &v.data == data {
                            v.vdcsn = Some(csn);
                        }
                    }
                }
                resolve_multi_valued(attr, is_delete_all);
            }
        },
    }
}

/// Answers "value-distinguished-at(CSN)" (§4.10): the present/deleted
/// values (across every attribute) whose `vdncsn` is the latest one at or
/// before `target`. Ties (multi-valued RDN) return every tied value.
pub fn value_distinguished_at(entry: &Entry, target: Csn) -> Vec<(String, Value)> {
    let mut best: Option<Csn> = None;
    let mut result = Vec::new();
    for (name, state) in &entry.attributes {
        let values: Vec<&Value> = match state {
            AttributeState::Multi(m) => m.present.iter().chain(m.deleted.iter()).collect(),
            AttributeState::Single(s) => s.current.iter().chain(s.pending.iter()).collect(),
        };
        for v in values {
            let Some(vdncsn) = v.vdncsn else { continue };
            if vdncsn > target {
                continue;
            }
            match best {
                None => {
                    best = Some(vdncsn);
                    result = vec![(name.clone(), v.clone())];
                }
                Some(b) if vdncsn > b => {
                    best = Some(vdncsn);
                    result = vec![(name.clone(), v.clone())];
                }
                Some(b) if vdncsn == b => result.push((name.clone(), v.clone())),
                _ => {}
            }
        }
    }
    result
}
