//! External-collaborator traits (§4.12, §6.5): the narrow seams the core
//! calls through without owning the implementation on the other side.

use std::io::BufReader;
use std::path::Path;

use crate::common::{Entry, Plist, PlistValue};
use crate::error::{DbError, Result};
use crate::import::ldif::{LdifReader, LdifSource, RawLdifRecord};

/// Schema validation, performed by the server's schema subsystem outside
/// this crate.
pub trait SchemaChecker: Send + Sync {
    fn check_entry(&self, entry: &Entry) -> std::result::Result<(), String>;
}

/// Bind-password verification, consulted only by the ACL `user`/AUTH
/// evaluator path when a clause demands a password check. The SASL
/// machinery itself lives outside this crate.
pub trait PasswordPolicy: Send + Sync {
    fn validate_bind_password(&self, dn: &str, password: &[u8]) -> bool;
}

/// Resolves a plist attribute that cannot be answered from the plist's own
/// slots — chiefly `user-ismember`, used by the `group` LAS.
pub trait AttributeGetter: Send + Sync {
    fn get(&self, plist: &Plist, attr: &str) -> Option<PlistValue>;
}

pub use crate::import::ldif::RawLdifRecord as LdifRecord;

/// Always passes every entry; used in tests and by the thin CLI when no
/// schema subsystem is wired in.
pub struct NoopSchemaChecker;

impl SchemaChecker for NoopSchemaChecker {
    fn check_entry(&self, _entry: &Entry) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Accepts any bind password; used in tests and by the thin CLI.
pub struct AlwaysAllowPasswordPolicy;

impl PasswordPolicy for AlwaysAllowPasswordPolicy {
    fn validate_bind_password(&self, _dn: &str, _password: &[u8]) -> bool {
        true
    }
}

/// Reads LDIF from a file path, or from stdin when the path is `-` (§6).
pub struct FileLdifSource {
    inner: LdifReader<Box<dyn std::io::Read + Send>>,
}

impl FileLdifSource {
    pub fn open(path: &str) -> Result<FileLdifSource> {
        let reader: Box<dyn std::io::Read + Send> = if path == "-" {
            Box::new(std::io::stdin())
        } else {
            Box::new(BufReader::new(std::fs::File::open(Path::new(path)).map_err(DbError::from)?))
        };
        Ok(FileLdifSource { inner: LdifReader::new(reader) })
    }
}

impl LdifSource for FileLdifSource {
    fn next_record(&mut self) -> Result<Option<RawLdifRecord>> {
        self.inner.next_record()
    }
}
