//! Cycle progress: the in-memory file sets and their persisted form.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::StateCodecError;
use crate::lsn::Lsn;

/// Key of the cycle record in the metadata store.
pub const CYCLE_STATE_KEY: &str = "data-eraser-cycle";

/// Current record format. Version 0 records carry no aging boundary.
pub const STATE_VERSION: u32 = 1;

pub type FileSet = BTreeSet<u32>;

/// The three disjoint file sets of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleFiles {
    pub remaining: FileSet,
    pub completed: FileSet,
    /// Skipped this cycle because an external hard link exists.
    pub hard_linked: FileSet,
}

impl CycleFiles {
    pub fn new(remaining: FileSet) -> Self {
        Self {
            remaining,
            ..Default::default()
        }
    }

    /// Moves `file` from remaining to completed.
    pub fn complete(&mut self, file: u32) {
        if self.remaining.remove(&file) {
            self.completed.insert(file);
        }
    }

    /// Moves `file` from remaining to hard-linked.
    pub fn skip_hard_linked(&mut self, file: u32) {
        if self.remaining.remove(&file) {
            self.hard_linked.insert(file);
        }
    }

    /// Files still to revisit, including hard-linked ones.
    pub fn unfinished(&self) -> FileSet {
        self.remaining.union(&self.hard_linked).copied().collect()
    }
}

/// Durable record of a cycle, written after every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentCycleState {
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub total_work: u64,
    pub completed: FileSet,
    /// Remaining and hard-linked files together.
    pub remaining: FileSet,
    /// [`Lsn::NULL`] until a first cycle has ended.
    pub oldest_allowed_obsolete_lsn: Lsn,
}

impl PersistentCycleState {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            32 + 5 * (self.completed.len() + self.remaining.len()),
        );
        buf.put_u64(self.start_time_ms);
        buf.put_u64(self.end_time_ms);
        put_packed(&mut buf, self.total_work);
        put_file_set(&mut buf, &self.completed);
        put_file_set(&mut buf, &self.remaining);
        put_packed(&mut buf, STATE_VERSION as u64);
        put_packed(&mut buf, self.oldest_allowed_obsolete_lsn.raw());
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, StateCodecError> {
        if buf.remaining() < 16 {
            return Err(StateCodecError::Truncated("cycle times"));
        }
        let start_time_ms = buf.get_u64();
        let end_time_ms = buf.get_u64();
        let total_work = get_packed(&mut buf, "total work")?;
        let completed = get_file_set(&mut buf, "completed files")?;
        let remaining = get_file_set(&mut buf, "remaining files")?;

        let version = if buf.has_remaining() {
            get_packed(&mut buf, "version")? as u32
        } else {
            0
        };
        if version > STATE_VERSION {
            return Err(StateCodecError::UnsupportedVersion(version));
        }
        let oldest_allowed_obsolete_lsn = if version >= 1 {
            match get_packed(&mut buf, "aging boundary")? {
                0 => Lsn::NULL,
                raw => Lsn::from_raw(raw),
            }
        } else {
            Lsn::NULL
        };

        Ok(Self {
            start_time_ms,
            end_time_ms,
            total_work,
            completed,
            remaining,
            oldest_allowed_obsolete_lsn,
        })
    }
}

/// Little-endian base-128 varint.
fn put_packed(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn get_packed(buf: &mut impl Buf, field: &'static str) -> Result<u64, StateCodecError> {
    let mut value = 0u64;
    for i in 0..10 {
        if !buf.has_remaining() {
            return Err(StateCodecError::Truncated(field));
        }
        let byte = buf.get_u8();
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(StateCodecError::Overlong(field))
}

/// Count, then the first file and the gaps between ascending files.
fn put_file_set(buf: &mut impl BufMut, files: &FileSet) {
    put_packed(buf, files.len() as u64);
    let mut prev = 0u32;
    for &file in files {
        put_packed(buf, (file - prev) as u64);
        prev = file;
    }
}

fn get_file_set(buf: &mut impl Buf, field: &'static str) -> Result<FileSet, StateCodecError> {
    let count = get_packed(buf, field)?;
    let mut files = FileSet::new();
    let mut prev = 0u64;
    for i in 0..count {
        let delta = get_packed(buf, field)?;
        if i > 0 && delta == 0 {
            return Err(StateCodecError::NotAscending);
        }
        let file = prev + delta;
        if file > u32::MAX as u64 {
            return Err(StateCodecError::NotAscending);
        }
        files.insert(file as u32);
        prev = file;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistentCycleState {
        PersistentCycleState {
            start_time_ms: 1_700_000_000_000,
            end_time_ms: 1_700_000_000_000 + 86_400_000,
            total_work: 3 * 10_000_000,
            completed: FileSet::from([0, 1, 5]),
            remaining: FileSet::from([6, 9, 300]),
            oldest_allowed_obsolete_lsn: Lsn::new(4, 0x200),
        }
    }

    #[test]
    fn test_round_trip() {
        let state = sample();
        assert_eq!(PersistentCycleState::decode(&state.encode()).unwrap(), state);
    }

    #[test]
    fn test_null_aging_boundary_round_trips() {
        let state = PersistentCycleState {
            oldest_allowed_obsolete_lsn: Lsn::NULL,
            ..sample()
        };
        let decoded = PersistentCycleState::decode(&state.encode()).unwrap();
        assert!(decoded.oldest_allowed_obsolete_lsn.is_null());
    }

    #[test]
    fn test_version_zero_record_has_no_aging_boundary() {
        let mut buf = BytesMut::new();
        buf.put_u64(10);
        buf.put_u64(20);
        put_packed(&mut buf, 99);
        put_file_set(&mut buf, &FileSet::from([1]));
        put_file_set(&mut buf, &FileSet::from([2, 3]));

        let state = PersistentCycleState::decode(&buf).unwrap();
        assert_eq!(state.total_work, 99);
        assert_eq!(state.remaining, FileSet::from([2, 3]));
        assert!(state.oldest_allowed_obsolete_lsn.is_null());
    }

    #[test]
    fn test_file_sets_are_delta_encoded() {
        let mut buf = BytesMut::new();
        put_file_set(&mut buf, &FileSet::from([1000, 1001, 1003]));
        // count, 1000 (two bytes), +1, +2
        assert_eq!(&buf[..], &[3, 0xe8, 0x07, 1, 2]);
    }

    #[test]
    fn test_rejects_future_version() {
        let mut buf = BytesMut::new();
        buf.put_u64(1);
        buf.put_u64(2);
        put_packed(&mut buf, 0);
        put_file_set(&mut buf, &FileSet::new());
        put_file_set(&mut buf, &FileSet::new());
        put_packed(&mut buf, 7);
        assert_eq!(
            PersistentCycleState::decode(&buf),
            Err(StateCodecError::UnsupportedVersion(7))
        );
    }

    #[test]
    fn test_truncated_record() {
        let bytes = sample().encode();
        let err = PersistentCycleState::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, StateCodecError::Truncated(_)));
        assert!(matches!(
            PersistentCycleState::decode(&bytes[..8]),
            Err(StateCodecError::Truncated("cycle times"))
        ));
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u64(1);
        buf.put_u64(2);
        put_packed(&mut buf, 0);
        put_packed(&mut buf, 2);
        put_packed(&mut buf, 4);
        put_packed(&mut buf, 0);
        assert_eq!(
            PersistentCycleState::decode(&buf),
            Err(StateCodecError::NotAscending)
        );
    }

    #[test]
    fn test_cycle_files_moves() {
        let mut files = CycleFiles::new(FileSet::from([1, 2, 3]));
        files.complete(1);
        files.skip_hard_linked(2);
        files.complete(9);
        assert_eq!(files.remaining, FileSet::from([3]));
        assert_eq!(files.completed, FileSet::from([1]));
        assert_eq!(files.hard_linked, FileSet::from([2]));
        assert_eq!(files.unfinished(), FileSet::from([2, 3]));
    }
}
