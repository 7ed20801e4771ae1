//! Appends well-formed entries to a log file.
//!
//! The eraser never appends; this is the write-path encoder used to build log
//! files for tooling and tests.

use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EraserError, EraserResult};
use crate::log::entries::{FileHeaderEntry, LnEntry, NodeEntry};
use crate::log::entry_type::LogEntryType;
use crate::log::file_manager::LogFileManager;
use crate::log::header::{EntryHeader, LOG_VERSION};
use crate::lsn::{Lsn, Vlsn};

pub struct LogWriter {
    file_number: u32,
    path: PathBuf,
    file: File,
    offset: u32,
    prev_offset: u32,
}

impl LogWriter {
    /// Creates `file_number` in `dir` and writes its file header entry.
    pub fn create(dir: &Path, file_number: u32, creation_time_ms: u64) -> EraserResult<Self> {
        let path = dir.join(LogFileManager::file_name(file_number));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| EraserError::io(format!("creating {}", path.display()), e))?;

        let mut writer = Self {
            file_number,
            path,
            file,
            offset: 0,
            prev_offset: 0,
        };

        let header = FileHeaderEntry {
            file_number,
            creation_time_ms,
            log_version: LOG_VERSION as u32,
        };
        let mut payload = BytesMut::new();
        header.encode(&mut payload);
        writer.append(LogEntryType::FileHeader, &payload, None)?;
        Ok(writer)
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    /// Appends a raw entry and returns its position.
    pub fn append(
        &mut self,
        entry_type: LogEntryType,
        payload: &[u8],
        vlsn: Option<Vlsn>,
    ) -> EraserResult<Lsn> {
        let mut header = EntryHeader::new(entry_type, self.prev_offset, payload.len() as u32, vlsn);
        let mut buf = BytesMut::with_capacity(header.size() + payload.len());
        header.encode_with_checksum(payload, &mut buf);
        buf.extend_from_slice(payload);

        self.file
            .write_all(&buf)
            .map_err(|e| EraserError::io(format!("appending to {}", self.path.display()), e))?;

        let lsn = Lsn::new(self.file_number, self.offset);
        self.prev_offset = self.offset;
        self.offset += buf.len() as u32;
        Ok(lsn)
    }

    pub fn append_ln(
        &mut self,
        entry_type: LogEntryType,
        ln: &LnEntry,
        vlsn: Option<Vlsn>,
    ) -> EraserResult<Lsn> {
        debug_assert!(entry_type.is_leaf_record());
        let mut payload = BytesMut::new();
        ln.encode(&mut payload);
        self.append(entry_type, &payload, vlsn)
    }

    pub fn append_node(
        &mut self,
        entry_type: LogEntryType,
        node: &NodeEntry,
        vlsn: Option<Vlsn>,
    ) -> EraserResult<Lsn> {
        debug_assert!(entry_type.is_tree_node());
        let mut payload = BytesMut::new();
        node.encode(&mut payload);
        self.append(entry_type, &payload, vlsn)
    }

    /// Flushes and fsyncs the file, consuming the writer.
    pub fn finish(mut self) -> EraserResult<PathBuf> {
        self.file
            .flush()
            .and_then(|_| self.file.sync_all())
            .map_err(|e| EraserError::io(format!("syncing {}", self.path.display()), e))?;
        Ok(self.path)
    }
}
