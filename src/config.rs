//! Job configuration (§1.1 ambient stack), mirroring the donor's
//! `enterprise::config` / `DatabaseConfig::default()` pattern: a
//! `serde`-deserializable struct with sane defaults, constructed once by
//! the CLI glue and handed to the job controller.

use serde::{Deserialize, Serialize};

/// Identifies the backend instance an import job targets, echoed into log
/// events and used to name spool/conflict files (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub instance_name: String,
    pub suffixes: Vec<String>,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        ServerIdentity { instance_name: "userroot".to_string(), suffixes: vec!["dc=example,dc=com".to_string()] }
    }
}

/// Job control flags (§6), kept as individually named booleans rather than
/// a raw bitset: `bitflags` earns its keep for byte-level wire formats
/// (see `kvstore::env::DbiFlags`), but a config struct gains nothing from
/// packing these into one word and loses `serde` field names doing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub identity: ServerIdentity,
    pub db_home: std::path::PathBuf,
    pub ldif_files: Vec<String>,
    pub include_subtrees: Vec<String>,
    pub exclude_subtrees: Vec<String>,
    pub indexed_attributes: Vec<String>,
    pub subtree_rename: bool,
    pub reindexing: bool,
    pub dn2rdn: bool,
    pub upgrade_dn_format: bool,
    pub upgrade_dn_format_v1: bool,
    pub dry_run: bool,
    pub fifo_ring_len: usize,
    pub generate_uniqueid: bool,
    pub track_modify_timestamps: bool,
    pub entry_usn: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            identity: ServerIdentity::default(),
            db_home: std::path::PathBuf::from("./db"),
            ldif_files: Vec::new(),
            include_subtrees: Vec::new(),
            exclude_subtrees: Vec::new(),
            indexed_attributes: vec!["cn".to_string(), "uid".to_string(), "objectclass".to_string()],
            subtree_rename: true,
            reindexing: false,
            dn2rdn: false,
            upgrade_dn_format: false,
            upgrade_dn_format_v1: false,
            dry_run: false,
            fifo_ring_len: 4096,
            generate_uniqueid: true,
            track_modify_timestamps: true,
            entry_usn: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = ImportConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ImportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identity.instance_name, cfg.identity.instance_name);
    }
}
