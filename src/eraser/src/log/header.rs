//! Entry header codec.
//!
//! Layout (little endian):
//!
//! ```text
//! | checksum u32 | type u8 | flags u8 | prev_offset u32 | item_size u32 | [vlsn u64] |
//! ```
//!
//! The checksum is CRC32C over every header byte after the checksum field plus
//! the payload. `vlsn` is present only when `flags` has [`FLAG_REPLICATED`].
//! Erased entries carry a stale checksum and are never validated.

use bytes::{Buf, BufMut};

use crate::error::{EraserError, EraserResult};
use crate::log::entry_type::LogEntryType;
use crate::lsn::{Lsn, Vlsn};

pub const CHECKSUM_SIZE: usize = 4;
/// Offset of the type tag from the start of the entry.
pub const TYPE_OFFSET: usize = 4;
pub const MIN_HEADER_SIZE: usize = 14;
pub const MAX_HEADER_SIZE: usize = MIN_HEADER_SIZE + 8;

pub const FLAG_REPLICATED: u8 = 0x01;
pub const LOG_VERSION: u8 = 1;
const VERSION_SHIFT: u8 = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    pub checksum: u32,
    pub entry_type: LogEntryType,
    pub flags: u8,
    pub prev_offset: u32,
    pub item_size: u32,
    pub vlsn: Option<Vlsn>,
}

impl EntryHeader {
    pub fn new(entry_type: LogEntryType, prev_offset: u32, item_size: u32, vlsn: Option<Vlsn>) -> Self {
        let mut flags = LOG_VERSION << VERSION_SHIFT;
        if vlsn.is_some() {
            flags |= FLAG_REPLICATED;
        }
        Self {
            checksum: 0,
            entry_type,
            flags,
            prev_offset,
            item_size,
            vlsn,
        }
    }

    /// Header size implied by the flags byte.
    pub fn size_for_flags(flags: u8) -> usize {
        if flags & FLAG_REPLICATED != 0 {
            MAX_HEADER_SIZE
        } else {
            MIN_HEADER_SIZE
        }
    }

    pub fn size(&self) -> usize {
        Self::size_for_flags(self.flags)
    }

    pub fn version(&self) -> u8 {
        self.flags >> VERSION_SHIFT
    }

    /// Erased entries report "no checksum available".
    pub fn has_checksum(&self) -> bool {
        self.entry_type != LogEntryType::Erased
    }

    /// Decodes a header from `buf`, which must hold at least [`EntryHeader::size_for_flags`] bytes.
    pub fn decode(mut buf: &[u8], lsn: Lsn) -> EraserResult<Self> {
        if buf.len() < MIN_HEADER_SIZE {
            return Err(EraserError::CorruptEntry {
                lsn,
                reason: format!("header needs {MIN_HEADER_SIZE} bytes, got {}", buf.len()),
            });
        }
        let checksum = buf.get_u32_le();
        let tag = buf.get_u8();
        let entry_type = LogEntryType::from_tag(tag).ok_or_else(|| EraserError::CorruptEntry {
            lsn,
            reason: format!("unknown entry type tag {tag}"),
        })?;
        let flags = buf.get_u8();
        let prev_offset = buf.get_u32_le();
        let item_size = buf.get_u32_le();
        let vlsn = if flags & FLAG_REPLICATED != 0 {
            if buf.remaining() < 8 {
                return Err(EraserError::CorruptEntry {
                    lsn,
                    reason: "replicated header truncated".to_string(),
                });
            }
            Some(Vlsn(buf.get_u64_le()))
        } else {
            None
        };

        Ok(Self {
            checksum,
            entry_type,
            flags,
            prev_offset,
            item_size,
            vlsn,
        })
    }

    /// Encodes the header with its checksum computed over `payload`.
    pub fn encode_with_checksum(&mut self, payload: &[u8], out: &mut impl BufMut) {
        let mut rest = Vec::with_capacity(MAX_HEADER_SIZE);
        self.encode_after_checksum(&mut rest);
        self.checksum = compute_checksum(&rest, payload);
        out.put_u32_le(self.checksum);
        out.put_slice(&rest);
    }

    fn encode_after_checksum(&self, out: &mut impl BufMut) {
        out.put_u8(self.entry_type.tag());
        out.put_u8(self.flags);
        out.put_u32_le(self.prev_offset);
        out.put_u32_le(self.item_size);
        if let Some(vlsn) = self.vlsn {
            out.put_u64_le(vlsn.0);
        }
    }

    /// Verifies the stored checksum against the raw header bytes and payload.
    pub fn validate(&self, raw_header: &[u8], payload: &[u8], lsn: Lsn) -> EraserResult<()> {
        if !self.has_checksum() {
            return Ok(());
        }
        let computed = compute_checksum(&raw_header[CHECKSUM_SIZE..], payload);
        if computed != self.checksum {
            return Err(EraserError::Checksum {
                lsn,
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }
}

pub fn compute_checksum(header_after_checksum: &[u8], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(header_after_checksum), payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicated_header_size() {
        let header = EntryHeader::new(LogEntryType::InsLn, 0, 10, Some(Vlsn(7)));
        assert_eq!(header.size(), MAX_HEADER_SIZE);
        assert_eq!(header.version(), LOG_VERSION);

        let header = EntryHeader::new(LogEntryType::InsLn, 0, 10, None);
        assert_eq!(header.size(), MIN_HEADER_SIZE);
    }

    #[test]
    fn test_checksum_detects_payload_change() {
        let payload = b"payload-bytes";
        let mut header = EntryHeader::new(LogEntryType::UpdLn, 40, payload.len() as u32, None);
        let mut raw = Vec::new();
        header.encode_with_checksum(payload, &mut raw);

        let lsn = Lsn::new(1, 40);
        let decoded = EntryHeader::decode(&raw, lsn).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.validate(&raw, payload, lsn).is_ok());

        let err = decoded.validate(&raw, b"payload-bytez", lsn).unwrap_err();
        assert!(matches!(err, EraserError::Checksum { .. }));
    }

    #[test]
    fn test_erased_header_skips_checksum() {
        let payload = b"secret";
        let mut header = EntryHeader::new(LogEntryType::InsLn, 0, payload.len() as u32, None);
        let mut raw = Vec::new();
        header.encode_with_checksum(payload, &mut raw);
        raw[TYPE_OFFSET] = LogEntryType::ERASED_TAG;

        let lsn = Lsn::new(3, 0);
        let decoded = EntryHeader::decode(&raw, lsn).unwrap();
        assert_eq!(decoded.entry_type, LogEntryType::Erased);
        assert!(!decoded.has_checksum());
        assert!(decoded.validate(&raw, &[0; 6], lsn).is_ok());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut raw = vec![0u8; MIN_HEADER_SIZE];
        raw[TYPE_OFFSET] = 0x77;
        let err = EntryHeader::decode(&raw, Lsn::new(0, 0)).unwrap_err();
        assert!(matches!(err, EraserError::CorruptEntry { .. }));
    }
}
