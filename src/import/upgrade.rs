//! Upgrade-DN producer variant (§4.5): reparses each entry's DN in the
//! obsolete format, detecting normalisation and RDN space conflicts.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::EntryId;
use crate::error::Result;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DnUpgradeStatus: u32 {
        const DN_NORM    = 0b01;
        const DN_NORM_SP = 0b10;
    }
}

/// Does the RDN need quote/backslash normalisation, or collapsing of
/// repeated internal spaces (which additionally requires conflict
/// resolution, since two differently-spaced RDNs can normalise to the
/// same value)?
pub fn classify_rdn(rdn: &str) -> DnUpgradeStatus {
    let mut status = DnUpgradeStatus::empty();
    if rdn.contains('\\') || rdn.contains('"') {
        status |= DnUpgradeStatus::DN_NORM;
    }
    if rdn.as_bytes().windows(2).any(|w| w[0] == b' ' && w[1] == b' ') {
        status |= DnUpgradeStatus::DN_NORM_SP;
    }
    status
}

/// Collapses runs of internal whitespace to a single space, the
/// normalisation `DN_NORM_SP` entries require.
pub fn normalise_spaces(rdn: &str) -> String {
    let mut out = String::with_capacity(rdn.len());
    let mut last_was_space = false;
    for c in rdn.chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(c);
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Dry-run mode: records `<dn>:<eid>` lines for every entry whose RDN
/// needed normalisation, so a later apply pass can rename conflicts.
pub struct ConflictFileWriter {
    path: PathBuf,
    file: std::fs::File,
}

impl ConflictFileWriter {
    pub fn create(dir: &Path, instance: &str) -> Result<ConflictFileWriter> {
        let path = dir.join(format!("{instance}_dn_norm_sp.txt"));
        let file = fs::File::create(&path)?;
        Ok(ConflictFileWriter { path, file })
    }

    pub fn record(&mut self, dn: &str, eid: EntryId) -> Result<()> {
        writeln!(self.file, "{dn}:{}", eid.0)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Apply mode: reads a dry-run conflict file as an allowlist, mapping each
/// primary EID to the set of conflicting EIDs that must be renamed.
pub fn read_conflict_table(path: &Path) -> Result<HashMap<EntryId, Vec<EntryId>>> {
    let content = fs::read_to_string(path)?;
    let mut table = HashMap::new();
    for line in content.lines() {
        let Some((primary, rest)) = line.split_once(':') else { continue };
        let Ok(primary_eid) = primary.trim().parse::<u32>() else { continue };
        let conflicts = rest
            .split_whitespace()
            .filter_map(|tok| tok.trim_end_matches(',').parse::<u32>().ok())
            .map(EntryId)
            .collect();
        table.insert(EntryId(primary_eid), conflicts);
    }
    Ok(table)
}

/// Renames a conflicting entry's RDN to `<rdn> <eid>,<parent>`, the
/// collision-breaking scheme applied in apply mode.
pub fn conflict_rename(rdn: &str, eid: EntryId, parent_dn: &str) -> String {
    format!("{rdn} {},{parent_dn}", eid.0)
}
