//! Delayed-slot spool (§4.3): spills writer-queue elements to a temp file
//! when their target table is being concurrently read by a producer (the
//! classic case is a DN-upgrade job reading `id2entry` while the writer
//! also wants to rewrite it).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};
use crate::import::queue::{Action, TargetSlot, WriteOp};

/// Record header: action tag (1 byte, padded to machine word), key length,
/// data length. Aligned to 8 bytes so reads never straddle a page boundary
/// awkwardly on 64-bit hosts.
const HEADER_LEN: usize = 16;

fn action_tag(action: Action) -> u8 {
    match action {
        Action::Add => 0,
        Action::AddIndex => 1,
        Action::DelIndex => 2,
        Action::AddVlv => 3,
        Action::DelVlv => 4,
        Action::AddEntryRdn => 5,
        Action::DelEntryRdn => 6,
        Action::Rmdir => 7,
        Action::Open => 8,
        Action::Close => 9,
    }
}

fn tag_action(tag: u8) -> Result<Action> {
    Ok(match tag {
        0 => Action::Add,
        1 => Action::AddIndex,
        2 => Action::DelIndex,
        3 => Action::AddVlv,
        4 => Action::DelVlv,
        5 => Action::AddEntryRdn,
        6 => Action::DelEntryRdn,
        7 => Action::Rmdir,
        8 => Action::Open,
        9 => Action::Close,
        other => return Err(DbError::Internal(format!("corrupt spool record tag {other}"))),
    })
}

/// Per-slot spill file at `<env>/<instance>/<db-file>.mdbimport`.
pub struct Spool {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Spool {
    pub fn create(dir: &Path, db_file: &str) -> Result<Spool> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{db_file}.mdbimport"));
        let file = File::create(&path)?;
        Ok(Spool { path, writer: BufWriter::new(file) })
    }

    /// Appends one op to the spool in place of enqueuing it to the writer
    /// queue. The reply channel, if any, is dropped: spooled writes are
    /// never synchronous (the spool exists precisely to defer them).
    pub fn append(&mut self, op: &WriteOp) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = action_tag(op.action);
        header[4..8].copy_from_slice(&(op.key.len() as u32).to_le_bytes());
        header[8..12].copy_from_slice(&(op.data.len() as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(op.target.0 as u32).to_le_bytes());
        self.writer.write_all(&header)?;
        self.writer.write_all(&op.key)?;
        self.writer.write_all(&op.data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Rewinds and replays every record, applying `apply` to each
    /// reconstructed op in file order. Consumes `self`; removes the spool
    /// file on success. I/O failure mid-replay is fatal to the job (§4.3).
    pub fn replay(mut self, mut apply: impl FnMut(WriteOp) -> Result<()>) -> Result<()> {
        self.flush()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN];
        loop {
            let n = reader.read(&mut header)?;
            if n == 0 {
                break;
            }
            if n != HEADER_LEN {
                return Err(DbError::Internal("truncated spool record header".into()));
            }
            let action = tag_action(header[0])?;
            let key_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
            let data_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
            let target = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key)?;
            let mut data = vec![0u8; data_len];
            reader.read_exact(&mut data)?;
            apply(WriteOp::new(action, TargetSlot(target), key, data))?;
        }
        drop(reader);
        fs::remove_file(&self.path)?;
        Ok(())
    }

    pub fn remove(self) -> Result<()> {
        drop(self.writer);
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_replay_preserves_order_and_contents() {
        let dir = tempdir().unwrap();
        let mut spool = Spool::create(dir.path(), "id2entry").unwrap();
        spool.append(&WriteOp::new(Action::Add, TargetSlot(0), b"k1".to_vec(), b"v1".to_vec())).unwrap();
        spool.append(&WriteOp::new(Action::Add, TargetSlot(0), b"k2".to_vec(), b"v2".to_vec())).unwrap();

        let mut seen = Vec::new();
        spool.replay(|op| {
            seen.push((op.key, op.data));
            Ok(())
        }).unwrap();

        assert_eq!(seen, vec![(b"k1".to_vec(), b"v1".to_vec()), (b"k2".to_vec(), b"v2".to_vec())]);
        assert!(!dir.path().join("id2entry.mdbimport").exists());
    }
}
