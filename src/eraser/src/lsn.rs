//! Physical and replicated log positions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Physical log position: file number in the high 32 bits, byte offset in the low 32 bits.
///
/// Ordering follows the log: a smaller LSN was written earlier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(u64);

impl Lsn {
    /// Sentinel meaning "no position".
    pub const NULL: Lsn = Lsn(u64::MAX);

    pub fn new(file_number: u32, offset: u32) -> Self {
        Self(((file_number as u64) << 32) | offset as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn file_number(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL_LSN")
        } else {
            write!(f, "0x{:x}/0x{:x}", self.file_number(), self.offset())
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid LSN '{0}': expected <file>/<offset> in hex, e.g. 0x1f/0x2a0")]
pub struct ParseLsnError(String);

impl FromStr for Lsn {
    type Err = ParseLsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseLsnError(s.to_string());
        let (file, offset) = s.trim().split_once('/').ok_or_else(err)?;
        let parse = |part: &str| {
            let part = part.trim();
            let digits = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            u32::from_str_radix(digits, 16).map_err(|_| err())
        };
        Ok(Lsn::new(parse(file)?, parse(offset)?))
    }
}

/// Logical position assigned to replicated log entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vlsn(pub u64);

impl Vlsn {
    pub const NULL: Vlsn = Vlsn(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Vlsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_components() {
        let lsn = Lsn::new(0x1f, 0x2a0);
        assert_eq!(lsn.file_number(), 0x1f);
        assert_eq!(lsn.offset(), 0x2a0);
        assert!(!lsn.is_null());
        assert!(Lsn::NULL.is_null());
    }

    #[test]
    fn test_lsn_ordering_follows_log() {
        assert!(Lsn::new(1, 500) < Lsn::new(2, 0));
        assert!(Lsn::new(2, 10) < Lsn::new(2, 11));
    }

    #[test]
    fn test_lsn_parse_display() {
        let lsn: Lsn = "0x1f/0x2a0".parse().unwrap();
        assert_eq!(lsn, Lsn::new(0x1f, 0x2a0));
        assert_eq!(lsn.to_string(), "0x1f/0x2a0");
        assert_eq!("a/10".parse::<Lsn>().unwrap(), Lsn::new(10, 16));
        assert!("nonsense".parse::<Lsn>().is_err());
        assert!("0x1/zz".parse::<Lsn>().is_err());
    }
}
