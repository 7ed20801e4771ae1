//! Sequential and random-access reading of log files.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{EraserError, EraserResult};
use crate::log::entry_type::LogEntryType;
use crate::log::header::{EntryHeader, MAX_HEADER_SIZE, MIN_HEADER_SIZE, TYPE_OFFSET};
use crate::lsn::Lsn;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One entry read from a log file.
#[derive(Clone, Debug)]
pub struct LogItem {
    pub lsn: Lsn,
    pub header: EntryHeader,
    pub payload: Bytes,
}

impl LogItem {
    pub fn entry_type(&self) -> LogEntryType {
        self.header.entry_type
    }

    /// File offset of the first payload byte.
    pub fn payload_offset(&self) -> u32 {
        self.lsn.offset() + self.header.size() as u32
    }

    pub fn payload_size(&self) -> u32 {
        self.header.item_size
    }

    pub fn total_size(&self) -> u64 {
        self.header.size() as u64 + self.header.item_size as u64
    }

    pub fn payload_is_zeroed(&self) -> bool {
        self.payload.iter().all(|b| *b == 0)
    }
}

/// Forward-only reader over a single log file.
pub struct FileReader {
    file_number: u32,
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    length: u64,
}

impl FileReader {
    pub fn open(path: &Path, file_number: u32) -> EraserResult<Self> {
        let file = File::open(path)
            .map_err(|e| EraserError::io(format!("opening {}", path.display()), e))?;
        let length = file
            .metadata()
            .map_err(|e| EraserError::io(format!("reading metadata of {}", path.display()), e))?
            .len();
        if length > u32::MAX as u64 {
            return Err(EraserError::FileTooLarge {
                path: path.display().to_string(),
                length,
            });
        }
        Ok(Self {
            file_number,
            path: path.to_path_buf(),
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
            position: 0,
            length,
        })
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Offsets fit in a `u32`: `open` rejects longer files.
    fn current_lsn(&self) -> Lsn {
        Lsn::new(self.file_number, self.position as u32)
    }

    fn io_err(&self, e: io::Error) -> EraserError {
        EraserError::io(
            format!("reading {} at offset {}", self.path.display(), self.position),
            e,
        )
    }

    /// Reads the raw header at the current position; `None` at end of file.
    ///
    /// A tail shorter than a header is treated as end of file.
    fn read_header(&mut self) -> EraserResult<Option<(Lsn, EntryHeader, Vec<u8>)>> {
        if self.length.saturating_sub(self.position) < MIN_HEADER_SIZE as u64 {
            return Ok(None);
        }
        let lsn = self.current_lsn();
        let mut raw = vec![0u8; MIN_HEADER_SIZE];
        self.reader.read_exact(&mut raw).map_err(|e| self.io_err(e))?;
        let flags = raw[5];
        let size = EntryHeader::size_for_flags(flags);
        if size > MIN_HEADER_SIZE {
            raw.resize(MAX_HEADER_SIZE, 0);
            self.reader
                .read_exact(&mut raw[MIN_HEADER_SIZE..])
                .map_err(|e| self.io_err(e))?;
        }
        let header = EntryHeader::decode(&raw, lsn)?;
        Ok(Some((lsn, header, raw)))
    }

    /// Reads the next entry and validates its checksum.
    pub fn next_entry(&mut self) -> EraserResult<Option<LogItem>> {
        let Some((lsn, header, raw)) = self.read_header()? else {
            return Ok(None);
        };
        let end = self.position + raw.len() as u64 + header.item_size as u64;
        if end > self.length {
            return Err(EraserError::CorruptEntry {
                lsn,
                reason: format!(
                    "entry of {} bytes runs past end of file ({} bytes)",
                    header.item_size, self.length
                ),
            });
        }
        let mut payload = vec![0u8; header.item_size as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| self.io_err(e))?;
        header.validate(&raw, &payload, lsn)?;
        self.position = end;
        Ok(Some(LogItem {
            lsn,
            header,
            payload: Bytes::from(payload),
        }))
    }

    /// Reads the next header and skips its payload without validation.
    pub fn next_header(&mut self) -> EraserResult<Option<(Lsn, EntryHeader)>> {
        let Some((lsn, header, raw)) = self.read_header()? else {
            return Ok(None);
        };
        self.reader
            .seek_relative(header.item_size as i64)
            .map_err(|e| self.io_err(e))?;
        self.position += raw.len() as u64 + header.item_size as u64;
        Ok(Some((lsn, header)))
    }
}

/// Reads the single entry at `lsn` from `path`.
pub fn read_entry_at(path: &Path, lsn: Lsn) -> EraserResult<LogItem> {
    let mut reader = FileReader::open(path, lsn.file_number())?;
    reader
        .reader
        .seek(SeekFrom::Start(lsn.offset() as u64))
        .map_err(|e| EraserError::io(format!("seeking in {}", path.display()), e))?;
    reader.position = lsn.offset() as u64;
    reader.next_entry()?.ok_or_else(|| EraserError::CorruptEntry {
        lsn,
        reason: "no entry at this position".to_string(),
    })
}

/// True when the entry at `lsn` bears the erased type tag.
///
/// Only the type byte is read, so this works on entries whose checksum no
/// longer matches.
pub fn is_erased_at(path: &Path, lsn: Lsn) -> EraserResult<bool> {
    let io_err = |e: io::Error| EraserError::io(format!("probing {} in {}", lsn, path.display()), e);
    let mut file = File::open(path).map_err(io_err)?;
    file.seek(SeekFrom::Start(lsn.offset() as u64 + TYPE_OFFSET as u64))
        .map_err(io_err)?;
    let mut tag = [0u8; 1];
    file.read_exact(&mut tag).map_err(io_err)?;
    Ok(tag[0] == LogEntryType::ERASED_TAG)
}

/// Per-type tally of one file's entries.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FileSummary {
    pub file_number: u32,
    pub total_entries: u64,
    pub total_bytes: u64,
    /// Count and bytes per live entry type; erased entries are excluded.
    pub by_type: BTreeMap<String, TypeTally>,
    pub erased_entries: u64,
    pub erased_bytes: u64,
    /// Erased entries whose payload still holds data (interrupted erasure).
    pub erased_not_zeroed: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TypeTally {
    pub count: u64,
    pub bytes: u64,
}

impl FileSummary {
    pub fn scan(path: &Path, file_number: u32) -> EraserResult<Self> {
        let mut reader = FileReader::open(path, file_number)?;
        let mut summary = FileSummary {
            file_number,
            ..Default::default()
        };
        while let Some(item) = reader.next_entry()? {
            summary.add(&item);
        }
        Ok(summary)
    }

    pub fn add(&mut self, item: &LogItem) {
        let size = item.total_size();
        self.total_entries += 1;
        self.total_bytes += size;
        let entry_type = item.entry_type();
        if entry_type.counts_toward_utilization() {
            let tally = self.by_type.entry(entry_type.name().to_string()).or_default();
            tally.count += 1;
            tally.bytes += size;
        } else {
            self.erased_entries += 1;
            self.erased_bytes += size;
            if !item.payload_is_zeroed() {
                self.erased_not_zeroed += 1;
            }
        }
    }

    pub fn count_of(&self, entry_type: LogEntryType) -> u64 {
        if entry_type == LogEntryType::Erased {
            return self.erased_entries;
        }
        self.by_type
            .get(entry_type.name())
            .map(|t| t.count)
            .unwrap_or(0)
    }
}
