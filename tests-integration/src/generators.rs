//! Log file generation for eraser scenarios.

use std::path::{Path, PathBuf};

use anyhow::Result;
use eraser::Lsn;
use eraser::log::{DatabaseId, LnEntry, LogEntryType, LogWriter};

pub const MINUTE_MS: u64 = 60_000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Database that all generated records belong to unless stated otherwise.
pub const DEFAULT_DB: DatabaseId = 1;

/// A log file written by [`LogFileBuilder`], with the positions of what it holds.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub file_number: u32,
    pub path: PathBuf,
    pub length: u64,
    /// Entries every erasure pass must destroy.
    pub doomed: Vec<Lsn>,
    /// Entries that must survive.
    pub kept: Vec<Lsn>,
}

/// Writes one log file entry by entry.
pub struct LogFileBuilder {
    writer: LogWriter,
    doomed: Vec<Lsn>,
    kept: Vec<Lsn>,
}

impl LogFileBuilder {
    pub fn new(dir: &Path, file_number: u32, creation_time_ms: u64) -> Result<Self> {
        Ok(Self {
            writer: LogWriter::create(dir, file_number, creation_time_ms)?,
            doomed: Vec::new(),
            kept: Vec::new(),
        })
    }

    /// A deletion marker.
    pub fn deleted(mut self, key: &[u8]) -> Result<Self> {
        let ln = LnEntry::new(DEFAULT_DB, key.to_vec(), Vec::new());
        let lsn = self.writer.append_ln(LogEntryType::DelLn, &ln, None)?;
        self.doomed.push(lsn);
        Ok(self)
    }

    /// A record the tree still references.
    pub fn live(mut self, key: &[u8], data: &[u8]) -> Result<Self> {
        let ln = LnEntry::new(DEFAULT_DB, key.to_vec(), data.to_vec());
        let lsn = self.writer.append_ln(LogEntryType::InsLn, &ln, None)?;
        self.kept.push(lsn);
        Ok(self)
    }

    /// A record whose expiration time has long passed.
    pub fn expired(mut self, key: &[u8], data: &[u8]) -> Result<Self> {
        let ln = LnEntry::new(DEFAULT_DB, key.to_vec(), data.to_vec()).with_expiration(1);
        let lsn = self.writer.append_ln(LogEntryType::InsLn, &ln, None)?;
        self.doomed.push(lsn);
        Ok(self)
    }

    /// `count` deletion markers with distinct keys.
    pub fn deleted_many(mut self, count: usize) -> Result<Self> {
        for i in 0..count {
            self = self.deleted(format!("gone-{i:04}").as_bytes())?;
        }
        Ok(self)
    }

    pub fn finish(self) -> Result<GeneratedFile> {
        let file_number = self.writer.file_number();
        let path = self.writer.finish()?;
        let length = std::fs::metadata(&path)?.len();
        Ok(GeneratedFile {
            file_number,
            path,
            length,
            doomed: self.doomed,
            kept: self.kept,
        })
    }
}

/// Writes the newest file of the log, which is never erased.
pub fn write_active_file(dir: &Path, file_number: u32, creation_time_ms: u64) -> Result<GeneratedFile> {
    LogFileBuilder::new(dir, file_number, creation_time_ms)?
        .live(b"active", b"still being written")?
        .finish()
}

/// A file created `age_ms` before `now_ms` holding a deletion marker, an
/// expired record and a live record.
pub fn write_mixed_file(dir: &Path, file_number: u32, now_ms: u64, age_ms: u64) -> Result<GeneratedFile> {
    LogFileBuilder::new(dir, file_number, now_ms - age_ms)?
        .deleted(format!("deleted-{file_number}").as_bytes())?
        .expired(format!("expired-{file_number}").as_bytes(), b"stale")?
        .live(format!("live-{file_number}").as_bytes(), b"value")?
        .finish()
}
