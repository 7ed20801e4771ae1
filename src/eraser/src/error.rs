//! Error and control-signal types for the eraser.
//!
//! Two families are kept apart:
//!
//! - [`EraserError`]: conditions that invalidate the environment (checksum
//!   failures, write/fsync failures, undecodable records).
//! - [`ControlSignal`]: expected state transitions of the scheduler (no files to
//!   work on, disabled, period changed, current file aborted, shutdown).
//!
//! [`Interrupt`] joins both so processing code can propagate either with `?`.

use crate::lsn::Lsn;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Fatal eraser failures.
#[derive(Error, Debug)]
pub enum EraserError {
    /// I/O failure while reading, writing or syncing a file.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Stored checksum does not match the entry contents.
    #[error("Checksum mismatch for entry at {lsn}: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { lsn: Lsn, stored: u32, computed: u32 },

    /// Entry header or payload cannot be decoded.
    #[error("Corrupt log entry at {lsn}: {reason}")]
    CorruptEntry { lsn: Lsn, reason: String },

    /// Log file too long for its offsets to fit an LSN.
    #[error("Log file {path} is {length} bytes, beyond the largest LSN offset")]
    FileTooLarge { path: String, length: u64 },

    /// Persisted cycle state could not be decoded.
    #[error("Invalid persisted cycle state: {0}")]
    StateCodec(#[from] StateCodecError),

    /// An external actor waited too long for the eraser to let go of a file.
    #[error("Timed out after {timeout:?} waiting for erasure of file {file:#x} to stop")]
    AbortTimeout { file: u32, timeout: Duration },

    /// Failure raised by a lifecycle hook (used to inject crashes in tests).
    #[error("Hook failure at {point}: {message}")]
    Hook { point: &'static str, message: String },

    /// The eraser thread terminated abnormally.
    #[error("Eraser thread panicked")]
    ThreadPanicked,
}

impl EraserError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        EraserError::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the failure means the file no longer exists.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, EraserError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Errors decoding the persisted cycle record.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateCodecError {
    #[error("record truncated while reading {0}")]
    Truncated(&'static str),
    #[error("packed integer too long while reading {0}")]
    Overlong(&'static str),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("file set is not strictly ascending")]
    NotAscending,
}

/// How loudly an idle condition should be reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// Expected, non-fatal transitions of the eraser state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Every remaining file is protected; wait and retry.
    NoUnprotectedFiles { severity: Severity, reason: String },
    /// Erasure is turned off; wait until it is re-enabled.
    Disabled,
    /// The configured period no longer matches the running cycle.
    PeriodChanged,
    /// An external actor asked the eraser to drop the current file.
    AbortCurrentFile,
    /// Classification of the current file cannot finish this cycle.
    DeferFile { reason: String },
    /// The eraser is shutting down.
    Shutdown,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::NoUnprotectedFiles { reason, .. } => {
                write!(f, "no unprotected files: {reason}")
            }
            ControlSignal::Disabled => write!(f, "erasure disabled"),
            ControlSignal::PeriodChanged => write!(f, "erasure period changed"),
            ControlSignal::AbortCurrentFile => write!(f, "current file aborted"),
            ControlSignal::DeferFile { reason } => write!(f, "file deferred: {reason}"),
            ControlSignal::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// Either a control signal or a fatal error, propagated with `?`.
#[derive(Debug)]
pub enum Interrupt {
    Signal(ControlSignal),
    Fatal(EraserError),
}

impl From<ControlSignal> for Interrupt {
    fn from(signal: ControlSignal) -> Self {
        Interrupt::Signal(signal)
    }
}

impl From<EraserError> for Interrupt {
    fn from(err: EraserError) -> Self {
        Interrupt::Fatal(err)
    }
}

impl From<StateCodecError> for Interrupt {
    fn from(err: StateCodecError) -> Self {
        Interrupt::Fatal(err.into())
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Signal(signal) => write!(f, "{signal}"),
            Interrupt::Fatal(err) => write!(f, "{err}"),
        }
    }
}

pub type EraserResult<T> = Result<T, EraserError>;
pub type StepResult<T> = Result<T, Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = EraserError::io("opening file", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_file_not_found());

        let err = EraserError::io("opening file", io::Error::other("disk on fire"));
        assert!(!err.is_file_not_found());
    }

    #[test]
    fn test_interrupt_conversions() {
        fn step(fail: bool) -> StepResult<()> {
            if fail {
                Err(ControlSignal::Shutdown)?;
            }
            Err(StateCodecError::NotAscending)?
        }

        assert!(matches!(
            step(true),
            Err(Interrupt::Signal(ControlSignal::Shutdown))
        ));
        assert!(matches!(
            step(false),
            Err(Interrupt::Fatal(EraserError::StateCodec(_)))
        ));
    }
}
