//! Engine components the eraser consumes but does not own.
//!
//! Each seam is a narrow trait so the eraser can run against the real engine
//! or against in-memory fixtures. All of them are grouped in [`EngineContext`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{EraserError, EraserResult};
use crate::log::{DatabaseId, LogFileManager, NodeEntry};
use crate::lsn::{Lsn, Vlsn};

/// A latched leaf node, valid for the duration of one [`TreeIndex::with_leaf`] call.
pub trait LeafNode {
    fn node_id(&self) -> u64;

    /// Whether `key` falls within this node's key range.
    fn covers(&self, key: &[u8]) -> bool;

    /// Position currently referenced by the slot holding `key`.
    fn slot_lsn(&self, key: &[u8]) -> Option<Lsn>;

    /// True when the node's latest logged version is a delta.
    fn is_delta(&self) -> bool;

    /// Position of the last full version of this node.
    fn last_full_lsn(&self) -> Lsn;

    /// Promotes a delta to its full form, marks it dirty and forbids logging
    /// it as a delta on the next flush.
    fn promote_to_full(&mut self);
}

/// Position of a tree node as currently reachable from the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodePosition {
    /// Latest logged version, full or delta.
    pub current_lsn: Lsn,
    pub is_delta: bool,
    pub last_full_lsn: Lsn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeLookup {
    Found(NodePosition),
    /// The node is the root of a tree nothing references any more.
    AbandonedRoot,
    NotFound,
}

/// Search access to the engine's B-tree.
pub trait TreeIndex: Send + Sync {
    /// Latches the leaf that would hold `key` in `db` and runs `visit` on it.
    ///
    /// Returns false when the database has no tree.
    fn with_leaf(
        &self,
        db: DatabaseId,
        key: &[u8],
        visit: &mut dyn FnMut(&mut dyn LeafNode),
    ) -> bool;

    /// Looks up the node a logged node entry belongs to by identity.
    fn find_node(&self, db: DatabaseId, node: &NodeEntry) -> NodeLookup;

    /// Promotes a delta node in place; see [`LeafNode::promote_to_full`].
    fn promote_delta(&self, db: DatabaseId, node_id: u64) -> bool;
}

#[cfg_attr(test, mockall::automock)]
pub trait CheckpointInfo: Send + Sync {
    /// Oldest position recovery needs, taken from the last checkpoint.
    /// [`Lsn::NULL`] when no checkpoint exists yet.
    fn first_active_lsn(&self) -> Lsn;
}

#[cfg_attr(test, mockall::automock)]
pub trait VlsnIndex: Send + Sync {
    /// Drops index entries up to `vlsn`, releasing files up to `file`.
    fn truncate_head(&self, vlsn: Vlsn, file: u32) -> bool;

    /// Lowest file the replication stream still needs.
    fn first_protected_file(&self) -> Option<u32>;
}

#[cfg_attr(test, mockall::automock)]
pub trait UtilizationTracker: Send + Sync {
    /// Offsets in `file` already known to be obsolete.
    fn obsolete_offsets(&self, file: u32) -> BTreeSet<u32>;

    /// Hands over offsets that could not be proven obsolete, for confirmation
    /// after the next checkpoint. An offset may be reported again by a later pass.
    fn transfer_suspects(&self, file: u32, offsets: &[u32]);

    /// True for cleaned files kept only to feed replication.
    fn is_reserved(&self, file: u32) -> bool;
}

#[cfg_attr(test, mockall::automock)]
pub trait FileProtector: Send + Sync {
    /// True while a backup, restore or cursor needs the file untouched.
    fn is_protected(&self, file: u32) -> bool;

    /// Deletes a reserved file; false when it is still needed.
    fn delete_reserved_file(&self, file: u32) -> EraserResult<bool>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseState {
    Open,
    /// Deletion started but has not finished.
    Deleting,
    Deleted,
}

#[cfg_attr(test, mockall::automock)]
pub trait DatabaseCatalog: Send + Sync {
    /// Databases the catalog no longer knows are reported as deleted.
    fn database_state(&self, db: DatabaseId) -> DatabaseState;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtinctionStatus {
    NotExtinct,
    Extinct,
    /// Application metadata is not initialized yet.
    Unknown,
}

#[cfg_attr(test, mockall::automock)]
pub trait ExtinctionFilter: Send + Sync {
    fn status(&self, db: DatabaseId, key: &[u8]) -> ExtinctionStatus;
}

#[cfg_attr(test, mockall::automock)]
pub trait LockProbe: Send + Sync {
    /// Non-blocking test for a lock held on the record at `lsn`.
    fn is_locked(&self, lsn: Lsn) -> bool;
}

#[cfg_attr(test, mockall::automock)]
pub trait Evictor: Send + Sync {
    /// Runs the cache's critical eviction path on the calling thread.
    fn critical_eviction(&self);
}

#[cfg_attr(test, mockall::automock)]
pub trait Environment: Send + Sync {
    fn is_replicated(&self) -> bool;

    /// True when the current mode forbids deleting log files.
    fn log_deletion_forbidden(&self) -> bool;

    /// Marks the environment unusable after a fatal eraser failure.
    fn invalidate(&self, error: &EraserError);
}

/// Keyed storage for the persisted cycle record.
pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &str) -> EraserResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> EraserResult<()>;
}

/// Time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;

    /// Maps a requested wait onto the real time actually blocked.
    ///
    /// Simulated clocks advance themselves by `requested` and return a
    /// short real wait.
    fn pause(&self, requested: Duration) -> Duration {
        requested
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Callbacks fired at named points of the eraser's lifecycle.
///
/// Returning an error from a fallible hook aborts the eraser as if the
/// corresponding step had failed.
pub trait EraserHooks: Send + Sync {
    fn cycle_started(&self, _remaining: &BTreeSet<u32>) {}

    fn before_file(&self, _file: u32) -> EraserResult<()> {
        Ok(())
    }

    /// Runs after a batch's type flips are durable and before payloads are zeroed.
    fn after_types_flipped(&self, _file: u32) -> EraserResult<()> {
        Ok(())
    }

    fn file_finished(&self, _file: u32) {}

    fn cycle_ended(&self, _completed: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl EraserHooks for NoopHooks {}

/// Everything the eraser needs from the surrounding engine.
#[derive(Clone)]
pub struct EngineContext {
    pub log: LogFileManager,
    pub tree: Arc<dyn TreeIndex>,
    pub checkpoint: Arc<dyn CheckpointInfo>,
    pub vlsn_index: Arc<dyn VlsnIndex>,
    pub tracker: Arc<dyn UtilizationTracker>,
    pub protector: Arc<dyn FileProtector>,
    pub catalog: Arc<dyn DatabaseCatalog>,
    pub extinction: Arc<dyn ExtinctionFilter>,
    pub locks: Arc<dyn LockProbe>,
    pub evictor: Arc<dyn Evictor>,
    pub environment: Arc<dyn Environment>,
    pub store: Arc<dyn MetadataStore>,
    pub clock: Arc<dyn Clock>,
    pub hooks: Arc<dyn EraserHooks>,
}

impl EngineContext {
    /// First file of the crash-recovery region; every file at or above it is off limits.
    pub fn recovery_start_file(&self) -> u32 {
        let lsn = self.checkpoint.first_active_lsn();
        if lsn.is_null() { 0 } else { lsn.file_number() }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryEngine, SimulatedClock};
    use mockall::Sequence;
    use tempfile::TempDir;

    #[test]
    fn test_recovery_start_file() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::new(dir.path()));
        let mut ctx = engine.context(Arc::new(SimulatedClock::new(0)));

        let mut checkpoint = MockCheckpointInfo::new();
        let mut seq = Sequence::new();
        checkpoint
            .expect_first_active_lsn()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Lsn::NULL);
        checkpoint
            .expect_first_active_lsn()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Lsn::new(7, 12));
        ctx.checkpoint = Arc::new(checkpoint);

        assert_eq!(ctx.recovery_start_file(), 0);
        assert_eq!(ctx.recovery_start_file(), 7);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        assert!(clock.now_ms() > 0);
        assert_eq!(clock.pause(Duration::from_millis(3)), Duration::from_millis(3));
    }
}
