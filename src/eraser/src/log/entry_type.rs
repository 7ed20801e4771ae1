//! Log entry type tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag stored in every entry header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryType {
    FileHeader,
    Checkpoint,
    Trace,
    TxnCommit,
    TxnAbort,
    /// Leaf record written by an insert.
    InsLn,
    /// Leaf record written by an update.
    UpdLn,
    /// Deleted-record marker.
    DelLn,
    /// Internal tree node.
    In,
    /// Full leaf tree node.
    Bin,
    /// Leaf tree node logged as a delta of its last full version.
    BinDelta,
    /// Reserved tag left behind by the eraser.
    Erased,
}

impl LogEntryType {
    /// Reserved tag value denoting an erased entry.
    pub const ERASED_TAG: u8 = 0xFF;

    pub const ALL: [LogEntryType; 12] = [
        LogEntryType::FileHeader,
        LogEntryType::Checkpoint,
        LogEntryType::Trace,
        LogEntryType::TxnCommit,
        LogEntryType::TxnAbort,
        LogEntryType::InsLn,
        LogEntryType::UpdLn,
        LogEntryType::DelLn,
        LogEntryType::In,
        LogEntryType::Bin,
        LogEntryType::BinDelta,
        LogEntryType::Erased,
    ];

    pub fn tag(self) -> u8 {
        match self {
            LogEntryType::FileHeader => 1,
            LogEntryType::Checkpoint => 2,
            LogEntryType::Trace => 3,
            LogEntryType::TxnCommit => 4,
            LogEntryType::TxnAbort => 5,
            LogEntryType::InsLn => 10,
            LogEntryType::UpdLn => 11,
            LogEntryType::DelLn => 12,
            LogEntryType::In => 20,
            LogEntryType::Bin => 21,
            LogEntryType::BinDelta => 22,
            LogEntryType::Erased => Self::ERASED_TAG,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Leaf record entries (key/value pairs or deletion markers).
    pub fn is_leaf_record(self) -> bool {
        matches!(
            self,
            LogEntryType::InsLn | LogEntryType::UpdLn | LogEntryType::DelLn
        )
    }

    /// Internal nodes, full leaf nodes and leaf deltas.
    pub fn is_tree_node(self) -> bool {
        matches!(
            self,
            LogEntryType::In | LogEntryType::Bin | LogEntryType::BinDelta
        )
    }

    pub fn is_bin_delta(self) -> bool {
        self == LogEntryType::BinDelta
    }

    pub fn is_deleted_record(self) -> bool {
        self == LogEntryType::DelLn
    }

    /// Only records and tree nodes are ever erased; bookkeeping entries are kept.
    pub fn is_erasable(self) -> bool {
        self.is_leaf_record() || self.is_tree_node()
    }

    /// Whether the entry takes part in per-type space accounting.
    ///
    /// Erased entries no longer hold a record and are reported separately.
    pub fn counts_toward_utilization(self) -> bool {
        self != LogEntryType::Erased
    }

    pub fn name(self) -> &'static str {
        match self {
            LogEntryType::FileHeader => "FileHeader",
            LogEntryType::Checkpoint => "Checkpoint",
            LogEntryType::Trace => "Trace",
            LogEntryType::TxnCommit => "TxnCommit",
            LogEntryType::TxnAbort => "TxnAbort",
            LogEntryType::InsLn => "InsLN",
            LogEntryType::UpdLn => "UpdLN",
            LogEntryType::DelLn => "DelLN",
            LogEntryType::In => "IN",
            LogEntryType::Bin => "BIN",
            LogEntryType::BinDelta => "BINDelta",
            LogEntryType::Erased => "Erased",
        }
    }
}

impl fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
