//! Log directory layout: file naming, enumeration and per-file facts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{EraserError, EraserResult};
use crate::log::entries::FileHeaderEntry;
use crate::log::entry_type::LogEntryType;
use crate::log::reader::FileReader;
use crate::lsn::{Lsn, Vlsn};

pub const LOG_FILE_SUFFIX: &str = ".jdb";

/// Facts about one log file, memoized by the scheduler for the life of a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub creation_time_ms: u64,
    pub length: u64,
    /// Highest replicated position stored in the file, if any.
    pub last_vlsn: Option<Vlsn>,
}

#[derive(Clone, Debug)]
pub struct LogFileManager {
    dir: PathBuf,
}

impl LogFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(file_number: u32) -> String {
        format!("{file_number:08x}{LOG_FILE_SUFFIX}")
    }

    pub fn parse_file_name(name: &str) -> Option<u32> {
        let stem = name.strip_suffix(LOG_FILE_SUFFIX)?;
        if stem.len() != 8 {
            return None;
        }
        u32::from_str_radix(stem, 16).ok()
    }

    pub fn file_path(&self, file_number: u32) -> PathBuf {
        self.dir.join(Self::file_name(file_number))
    }

    /// All log file numbers in ascending order.
    pub fn list_file_numbers(&self) -> EraserResult<Vec<u32>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| EraserError::io(format!("listing {}", self.dir.display()), e))?;
        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| EraserError::io(format!("listing {}", self.dir.display()), e))?;
            if let Some(number) = entry.file_name().to_str().and_then(Self::parse_file_name) {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Every file except the newest, which is still being written.
    pub fn sealed_file_numbers(&self) -> EraserResult<Vec<u32>> {
        let mut numbers = self.list_file_numbers()?;
        numbers.pop();
        Ok(numbers)
    }

    pub fn exists(&self, file_number: u32) -> bool {
        self.file_path(file_number).exists()
    }

    /// True when something other than the log directory links to the file.
    pub fn has_external_hard_link(&self, file_number: u32) -> EraserResult<bool> {
        let path = self.file_path(file_number);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(link_count(&metadata) > 1),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EraserError::io(format!("reading metadata of {}", path.display()), e)),
        }
    }

    /// Reads creation time, length and last replicated position; `None` if the file is gone.
    pub fn read_file_info(&self, file_number: u32) -> EraserResult<Option<FileInfo>> {
        let path = self.file_path(file_number);
        let mut reader = match FileReader::open(&path, file_number) {
            Ok(reader) => reader,
            Err(e) if e.is_file_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let header_item = reader.next_entry()?.ok_or_else(|| EraserError::CorruptEntry {
            lsn: Lsn::new(file_number, 0),
            reason: "file has no header entry".to_string(),
        })?;
        if header_item.entry_type() != LogEntryType::FileHeader {
            return Err(EraserError::CorruptEntry {
                lsn: header_item.lsn,
                reason: format!("expected file header, found {}", header_item.entry_type()),
            });
        }
        let header = FileHeaderEntry::decode(header_item.payload, header_item.lsn)?;

        let mut last_vlsn = None;
        while let Some((_, entry_header)) = reader.next_header()? {
            if let Some(vlsn) = entry_header.vlsn {
                last_vlsn = Some(last_vlsn.map_or(vlsn, |v: Vlsn| v.max(vlsn)));
            }
        }

        Ok(Some(FileInfo {
            creation_time_ms: header.creation_time_ms,
            length: reader.length(),
            last_vlsn,
        }))
    }
}

#[cfg(unix)]
fn link_count(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn link_count(_metadata: &fs::Metadata) -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entries::LnEntry;
    use crate::log::writer::LogWriter;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        assert_eq!(LogFileManager::file_name(0x1f), "0000001f.jdb");
        assert_eq!(LogFileManager::parse_file_name("0000001f.jdb"), Some(0x1f));
        assert_eq!(LogFileManager::parse_file_name("1f.jdb"), None);
        assert_eq!(LogFileManager::parse_file_name("0000001f.del"), None);
    }

    #[test]
    fn test_sealed_files_exclude_newest() {
        let dir = TempDir::new().unwrap();
        for n in [3u32, 1, 2] {
            LogWriter::create(dir.path(), n, 1_000).unwrap().finish().unwrap();
        }
        std::fs::write(dir.path().join("je.lck"), b"").unwrap();

        let manager = LogFileManager::new(dir.path());
        assert_eq!(manager.list_file_numbers().unwrap(), vec![1, 2, 3]);
        assert_eq!(manager.sealed_file_numbers().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_read_file_info() {
        let dir = TempDir::new().unwrap();
        let mut writer = LogWriter::create(dir.path(), 7, 123_456).unwrap();
        writer
            .append_ln(LogEntryType::InsLn, &LnEntry::new(1, &b"a"[..], &b"b"[..]), Some(Vlsn(40)))
            .unwrap();
        writer
            .append_ln(LogEntryType::InsLn, &LnEntry::new(1, &b"c"[..], &b"d"[..]), None)
            .unwrap();
        let path = writer.finish().unwrap();

        let manager = LogFileManager::new(dir.path());
        let info = manager.read_file_info(7).unwrap().unwrap();
        assert_eq!(info.creation_time_ms, 123_456);
        assert_eq!(info.length, std::fs::metadata(path).unwrap().len());
        assert_eq!(info.last_vlsn, Some(Vlsn(40)));

        assert!(manager.read_file_info(8).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_link_detection() {
        let dir = TempDir::new().unwrap();
        let path = LogWriter::create(dir.path(), 1, 1_000).unwrap().finish().unwrap();
        let manager = LogFileManager::new(dir.path());
        assert!(!manager.has_external_hard_link(1).unwrap());

        std::fs::hard_link(&path, dir.path().join("snapshot-copy")).unwrap();
        assert!(manager.has_external_hard_link(1).unwrap());
    }
}
