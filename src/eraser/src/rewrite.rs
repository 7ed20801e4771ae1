//! In-place erasure of log entries.
//!
//! For every batch: flip the type byte of each entry to the erased tag,
//! fsync, zero each payload, fsync. A reader therefore never sees a zeroed
//! payload under its original type. The file is touched and synced once
//! before its first mutation so its modification time records the erasure.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collaborators::EraserHooks;
use crate::error::{EraserError, EraserResult};
use crate::log::LogEntryType;
use crate::log::LogItem;
use crate::log::header::TYPE_OFFSET;
use crate::metrics::EraserMetrics;

const ZEROES: [u8; 4096] = [0u8; 4096];

/// One entry queued for erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseTarget {
    /// Offset of the entry header.
    pub offset: u32,
    pub payload_offset: u32,
    pub payload_size: u32,
    /// The type byte already holds the erased tag; only the payload needs zeroing.
    pub already_flipped: bool,
}

impl EraseTarget {
    pub fn for_item(item: &LogItem) -> Self {
        Self {
            offset: item.lsn.offset(),
            payload_offset: item.payload_offset(),
            payload_size: item.payload_size(),
            already_flipped: item.entry_type() == LogEntryType::Erased,
        }
    }
}

/// Work done by one flushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub entries: u64,
    pub bytes_written: u64,
}

pub struct FileRewriter<'a> {
    path: PathBuf,
    file_number: u32,
    file: Option<File>,
    pending: Vec<EraseTarget>,
    max_batch: usize,
    metrics: &'a EraserMetrics,
    hooks: &'a dyn EraserHooks,
    erased: u64,
    rezeroed: u64,
}

impl<'a> FileRewriter<'a> {
    pub fn new(
        path: &Path,
        file_number: u32,
        max_batch: usize,
        metrics: &'a EraserMetrics,
        hooks: &'a dyn EraserHooks,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            file_number,
            file: None,
            pending: Vec::new(),
            max_batch: max_batch.max(1),
            metrics,
            hooks,
            erased: 0,
            rezeroed: 0,
        }
    }

    pub fn queue(&mut self, target: EraseTarget) {
        self.pending.push(target);
    }

    pub fn is_batch_full(&self) -> bool {
        self.pending.len() >= self.max_batch
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Entries flipped so far plus previously flipped entries re-zeroed.
    pub fn totals(&self) -> (u64, u64) {
        (self.erased, self.rezeroed)
    }

    fn io_err(&self, action: &str, e: std::io::Error) -> EraserError {
        EraserError::io(format!("{action} {}", self.path.display()), e)
    }

    /// Opens the file for writing and makes a durable touch-write before the
    /// first mutation.
    fn open(&mut self) -> EraserResult<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_err("opening for erasure", e))?;

        let mut first = [0u8; 1];
        file.read_exact(&mut first)
            .map_err(|e| self.io_err("reading first byte of", e))?;
        write_at(&mut file, 0, &first).map_err(|e| self.io_err("touching", e))?;
        self.metrics.record_write(1);
        file.sync_all().map_err(|e| self.io_err("syncing", e))?;
        self.metrics.record_fsync();

        debug!(file = self.file_number, "Opened log file for erasure");
        self.file = Some(file);
        Ok(())
    }

    /// Rewrites every queued entry. Performs no I/O when nothing is queued.
    pub fn flush(&mut self) -> EraserResult<FlushStats> {
        if self.pending.is_empty() {
            return Ok(FlushStats::default());
        }
        self.open()?;
        let batch = std::mem::take(&mut self.pending);
        let mut stats = FlushStats {
            entries: batch.len() as u64,
            bytes_written: 0,
        };

        let Some(file) = self.file.as_mut() else {
            return Ok(stats);
        };

        let flips: Vec<&EraseTarget> = batch.iter().filter(|t| !t.already_flipped).collect();
        if !flips.is_empty() {
            for target in &flips {
                write_at(
                    file,
                    target.offset as u64 + TYPE_OFFSET as u64,
                    &[LogEntryType::ERASED_TAG],
                )
                .map_err(|e| EraserError::io(format!("flipping type in {}", self.path.display()), e))?;
                self.metrics.record_write(1);
                stats.bytes_written += 1;
            }
            file.sync_all()
                .map_err(|e| EraserError::io(format!("syncing {}", self.path.display()), e))?;
            self.metrics.record_fsync();
            self.hooks.after_types_flipped(self.file_number)?;
        }

        for target in &batch {
            write_zeroes(file, target.payload_offset as u64, target.payload_size as u64)
                .map_err(|e| EraserError::io(format!("zeroing payload in {}", self.path.display()), e))?;
            self.metrics.record_write(target.payload_size as u64);
            stats.bytes_written += target.payload_size as u64;
        }
        file.sync_all()
            .map_err(|e| EraserError::io(format!("syncing {}", self.path.display()), e))?;
        self.metrics.record_fsync();

        let flipped = flips.len() as u64;
        let rezeroed = stats.entries - flipped;
        self.erased += flipped;
        self.rezeroed += rezeroed;
        self.metrics.record_entries_erased(flipped);
        self.metrics.record_entries_rezeroed(rezeroed);
        Ok(stats)
    }

    /// Flushes what is left and returns `(erased, rezeroed)` totals for the file.
    pub fn finish(mut self) -> EraserResult<(u64, u64)> {
        self.flush()?;
        Ok(self.totals())
    }
}

fn write_at(file: &mut File, offset: u64, buf: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

fn write_zeroes(file: &mut File, offset: u64, len: u64) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut left = len;
    while left > 0 {
        let chunk = left.min(ZEROES.len() as u64) as usize;
        file.write_all(&ZEROES[..chunk])?;
        left -= chunk as u64;
    }
    Ok(())
}
