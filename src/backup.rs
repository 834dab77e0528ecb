//! Backup/restore metadata dumps (§6 "Backup/restore metadata"):
//! `dse_instance.ldif` and `dse_index.ldif`, the two LDIF snapshots taken
//! of the directory's own configuration entries at backup time.

use std::io::Write;

use crate::common::Entry;
use crate::error::Result;
use crate::import::ldif::{LdifReader, LdifSource};

/// `numsubordinates` is server-maintained and would be stale the moment it
/// is replayed back in, so it is dropped from both dumps.
const EXCLUDED_ATTR: &str = "numsubordinates";

fn dump_filtered(entries: &[Entry], object_class: &str, out: &mut impl Write) -> Result<()> {
    let mut first = true;
    for entry in entries {
        let matches = entry
            .attributes
            .get("objectclass")
            .map(|attr| match attr {
                crate::common::AttributeState::Multi(m) => {
                    m.present.iter().any(|v| v.as_str().eq_ignore_ascii_case(object_class))
                }
                crate::common::AttributeState::Single(s) => {
                    s.current.as_ref().is_some_and(|v| v.as_str().eq_ignore_ascii_case(object_class))
                }
            })
            .unwrap_or(false);
        if !matches {
            continue;
        }

        if !first {
            writeln!(out)?;
        }
        first = false;

        writeln!(out, "dn: {}", entry.dn)?;
        for attr in entry.attributes.values() {
            if attr.name().eq_ignore_ascii_case(EXCLUDED_ATTR) {
                continue;
            }
            match attr {
                crate::common::AttributeState::Multi(m) => {
                    for v in &m.present {
                        writeln!(out, "{}: {}", m.name, v.as_str())?;
                    }
                }
                crate::common::AttributeState::Single(s) => {
                    if let Some(v) = &s.current {
                        writeln!(out, "{}: {}", s.name, v.as_str())?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Writes `dse_instance.ldif`: every entry with `objectclass:
/// nsBackendInstance`.
pub fn dump_instance_ldif(entries: &[Entry], out: &mut impl Write) -> Result<()> {
    dump_filtered(entries, "nsBackendInstance", out)
}

/// Writes `dse_index.ldif`: every entry with `objectclass: nsIndex`.
pub fn dump_index_ldif(entries: &[Entry], out: &mut impl Write) -> Result<()> {
    dump_filtered(entries, "nsIndex", out)
}

/// Reads a dump produced by either `dump_instance_ldif` or
/// `dump_index_ldif` back into entries, treating every attribute as
/// multi-valued (matching the producer's own simplification in
/// `import::producer`).
pub fn restore_from_ldif(source: impl std::io::Read + Send) -> Result<Vec<Entry>> {
    let mut reader = LdifReader::new(source);
    let mut entries = Vec::new();
    let mut next_id = crate::common::EntryId(1);

    while let Some(record) = reader.next_record()? {
        let mut entry = Entry::new(next_id, record.dn);
        next_id = next_id.next();

        let mut grouped: std::collections::HashMap<String, Vec<Vec<u8>>> = std::collections::HashMap::new();
        for line in record.attrs {
            grouped.entry(line.name.to_ascii_lowercase()).or_default().push(line.value);
        }
        for (name, values) in grouped {
            entry.set_attr_values(&name, values, false);
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_instance_entry() -> Entry {
        let mut e = Entry::new(crate::common::EntryId(1), "cn=userRoot,cn=ldbm database,cn=plugins,cn=config");
        e.set_attr_values("objectclass", vec![b"top".to_vec(), b"nsBackendInstance".to_vec()], false);
        e.set_attr_values("cn", vec![b"userRoot".to_vec()], true);
        e.set_attr_values("numsubordinates", vec![b"42".to_vec()], true);
        e
    }

    #[test]
    fn dumps_only_matching_object_class_and_excludes_numsubordinates() {
        let entries = vec![
            backend_instance_entry(),
            {
                let mut e = Entry::new(crate::common::EntryId(2), "cn=schema");
                e.set_attr_values("objectclass", vec![b"top".to_vec()], false);
                e
            },
        ];
        let mut out = Vec::new();
        dump_instance_ldif(&entries, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("dn: cn=userRoot,cn=ldbm database,cn=plugins,cn=config"));
        assert!(!text.contains("cn=schema"));
        assert!(!text.to_ascii_lowercase().contains("numsubordinates"));
    }

    #[test]
    fn dump_then_restore_round_trips_dn_and_attributes() {
        let entries = vec![backend_instance_entry()];
        let mut out = Vec::new();
        dump_instance_ldif(&entries, &mut out).unwrap();

        let restored = restore_from_ldif(std::io::Cursor::new(out)).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].dn, "cn=userRoot,cn=ldbm database,cn=plugins,cn=config");
        assert_eq!(restored[0].first_value_str("cn").as_deref(), Some("userRoot"));
    }
}
