//! On-disk log format as seen by the eraser.
//!
//! - `entry_type`: type tags, including the reserved erased tag
//! - `header`: entry header codec and checksums
//! - `entries`: payload codecs for file headers, records and tree nodes
//! - `reader` / `writer`: sequential access to log files
//! - `file_manager`: file naming, enumeration and per-file facts

pub mod entries;
pub mod entry_type;
pub mod file_manager;
pub mod header;
pub mod reader;
pub mod writer;

pub use entries::{DatabaseId, FileHeaderEntry, LnEntry, NodeEntry};
pub use entry_type::LogEntryType;
pub use file_manager::{FileInfo, LogFileManager};
pub use header::EntryHeader;
pub use reader::{FileReader, FileSummary, LogItem, is_erased_at, read_entry_at};
pub use writer::LogWriter;
