use std::path::Path;

use bitflags::bitflags;
use heed::types::Bytes;
use heed::{EnvFlags, EnvOpenOptions};

use crate::error::{DbError, Result};

use super::KvDatabase;

bitflags! {
    /// Flags accepted by [`KvEnv::open_dbi`]. `MARK_DIRTY`/`OPEN_DIRTY` and
    /// `TRUNCATE` are import-engine bookkeeping bits consumed by the
    /// writer/producer (§4.3, §4.5) rather than forwarded to the store:
    /// the underlying engine has no notion of a "dirty" database, only the
    /// import job does (a table currently being read by a producer while
    /// also targeted by the writer).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DbiFlags: u32 {
        const CREATE       = 0b0000_0001;
        const DUP_SORT     = 0b0000_0010;
        const DUP_FIXED    = 0b0000_0100;
        const INTEGER_KEY  = 0b0000_1000;
        const MARK_DIRTY   = 0b0001_0000;
        const OPEN_DIRTY   = 0b0010_0000;
        const TRUNCATE     = 0b0100_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PutFlags: u32 {
        const NO_OVERWRITE = 0b0000_0001;
        const NO_DUP_DATA  = 0b0000_0010;
        const APPEND       = 0b0000_0100;
        const APPEND_DUP   = 0b0000_1000;
        const CURRENT      = 0b0001_0000;
    }
}

impl PutFlags {
    fn to_heed(self) -> heed::PutFlags {
        let mut out = heed::PutFlags::empty();
        if self.contains(PutFlags::NO_OVERWRITE) {
            out |= heed::PutFlags::NO_OVERWRITE;
        }
        if self.contains(PutFlags::NO_DUP_DATA) {
            out |= heed::PutFlags::NO_DUP_DATA;
        }
        if self.contains(PutFlags::APPEND) {
            out |= heed::PutFlags::APPEND;
        }
        if self.contains(PutFlags::APPEND_DUP) {
            out |= heed::PutFlags::APPEND_DUP;
        }
        out
    }
}

/// An open environment: one memory-mapped file set holding every database
/// for a backend instance.
pub struct KvEnv {
    env: heed::Env,
}

/// A handle to a single database (dbi) within [`KvEnv`], bound to the codec
/// used throughout this crate (raw bytes in, raw bytes out).
#[derive(Clone, Copy)]
pub struct Dbi {
    db: KvDatabase,
    dup_sort: bool,
}

impl KvEnv {
    /// Opens (creating if absent) the environment at `path`, reserving room
    /// for `max_dbs` named databases (`id2entry`, `entryrdn`, `parentid`,
    /// one per indexed attribute, VLV tables, …).
    ///
    /// # Safety contract
    ///
    /// `heed::EnvOpenOptions::open` is `unsafe` because LMDB cannot protect
    /// against two processes opening the same environment with
    /// incompatible flags; callers must ensure `path` is exclusive to this
    /// process for the lifetime of the returned `KvEnv`, which the import
    /// job controller (§4.9) already guarantees by holding the instance
    /// lock file for its whole run.
    pub fn open(path: &Path, max_dbs: u32) -> Result<KvEnv> {
        std::fs::create_dir_all(path)?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024)
                .max_dbs(max_dbs)
                .max_readers(256)
                .flags(EnvFlags::NO_TLS)
                .open(path)?
        };
        Ok(KvEnv { env })
    }

    pub fn begin_write(&self) -> Result<heed::RwTxn<'_>> {
        Ok(self.env.write_txn()?)
    }

    pub fn begin_read(&self) -> Result<heed::RoTxn<'_>> {
        Ok(self.env.read_txn()?)
    }

    /// Opens (creating if `flags` contains `CREATE`) the named database
    /// under a write transaction.
    pub fn open_dbi(&self, wtxn: &mut heed::RwTxn<'_>, name: &str, flags: DbiFlags) -> Result<Dbi> {
        if flags.contains(DbiFlags::TRUNCATE) {
            // Best-effort: drop and recreate so reindex jobs start clean.
            if let Some(db) = self
                .env
                .open_database::<Bytes, Bytes>(wtxn, Some(name))?
            {
                db.clear(wtxn)?;
            }
        }
        let mut options = self.env.database_options().types::<Bytes, Bytes>();
        if flags.contains(DbiFlags::DUP_SORT) {
            options.flags(heed::DatabaseFlags::DUP_SORT);
        }
        if flags.contains(DbiFlags::DUP_FIXED) {
            options.flags(heed::DatabaseFlags::DUP_FIXED);
        }
        if flags.contains(DbiFlags::INTEGER_KEY) {
            options.flags(heed::DatabaseFlags::INTEGER_KEY);
        }
        let db = if flags.contains(DbiFlags::CREATE) {
            options.name(name).create(wtxn)?
        } else {
            options
                .name(name)
                .open(wtxn)?
                .ok_or_else(|| DbError::NotFound(format!("dbi {name} does not exist")))?
        };
        Ok(Dbi {
            db,
            dup_sort: flags.contains(DbiFlags::DUP_SORT),
        })
    }

    /// Opens an existing database under a read-only transaction. Used by
    /// workers and reindex producers, which never create databases.
    pub fn open_dbi_ro(&self, rtxn: &heed::RoTxn<'_>, name: &str) -> Result<Dbi> {
        let db = self
            .env
            .open_database::<Bytes, Bytes>(rtxn, Some(name))?
            .ok_or_else(|| DbError::NotFound(format!("dbi {name} does not exist")))?;
        Ok(Dbi { db, dup_sort: false })
    }

    pub fn force_sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl Dbi {
    pub fn is_dup_sort(&self) -> bool {
        self.dup_sort
    }

    pub fn get<'txn>(&self, rtxn: &'txn heed::RoTxn<'_>, key: &[u8]) -> Result<Option<&'txn [u8]>> {
        Ok(self.db.get(rtxn, key)?)
    }

    pub fn put(&self, wtxn: &mut heed::RwTxn<'_>, key: &[u8], data: &[u8]) -> Result<()> {
        self.db.put(wtxn, key, data)?;
        Ok(())
    }

    pub fn put_with_flags(
        &self,
        wtxn: &mut heed::RwTxn<'_>,
        flags: PutFlags,
        key: &[u8],
        data: &[u8],
    ) -> Result<()> {
        self.db.put_with_flags(wtxn, flags.to_heed(), key, data)?;
        Ok(())
    }

    /// Deletes `key`. If `data` is `Some` and the database is dup-sorted,
    /// only that one duplicate is removed; otherwise every duplicate (or
    /// the sole value) is removed.
    pub fn del(&self, wtxn: &mut heed::RwTxn<'_>, key: &[u8], data: Option<&[u8]>) -> Result<bool> {
        match data {
            Some(d) if self.dup_sort => Ok(self.db.delete_one_duplicate(wtxn, key, d)?),
            _ => Ok(self.db.delete(wtxn, key)?),
        }
    }

    pub(crate) fn database(&self) -> KvDatabase {
        self.db
    }
}
