//! Choice of the next file to erase.
//!
//! A file is eligible when nothing protects it: no backup or cursor, no
//! replication need, and it lies below the crash-recovery region. When no
//! remaining file is eligible the selector explains why, and in a replicated
//! environment first tries to release files by truncating the head of the
//! replication index.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::collaborators::EngineContext;
use crate::coordination::Coordinator;
use crate::error::{ControlSignal, EraserResult, Interrupt, Severity, StepResult};
use crate::log::FileInfo;
use crate::state::FileSet;

/// Per-cycle memo of file facts, so a file is opened at most once for them.
#[derive(Debug, Default)]
pub struct FileInfoCache {
    infos: HashMap<u32, FileInfo>,
}

impl FileInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts for `file`, reading them on first use. `None` when the file is gone.
    pub fn get(&mut self, ctx: &EngineContext, file: u32) -> EraserResult<Option<FileInfo>> {
        if let Some(info) = self.infos.get(&file) {
            return Ok(Some(info.clone()));
        }
        let info = ctx.log.read_file_info(file)?;
        if let Some(info) = &info {
            self.infos.insert(file, info.clone());
        }
        Ok(info)
    }

    pub fn contains(&self, file: u32) -> bool {
        self.infos.contains_key(&file)
    }

    /// Drops the entry of a file that left the remaining set.
    pub fn forget(&mut self, file: u32) {
        self.infos.remove(&file);
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

pub struct FileSelector<'a> {
    ctx: &'a EngineContext,
    coordinator: &'a Coordinator,
}

impl<'a> FileSelector<'a> {
    pub fn new(ctx: &'a EngineContext, coordinator: &'a Coordinator) -> Self {
        Self { ctx, coordinator }
    }

    fn is_unprotected(&self, file: u32, recovery_start: u32) -> bool {
        if file >= recovery_start || self.ctx.protector.is_protected(file) {
            return false;
        }
        match self.ctx.vlsn_index.first_protected_file() {
            Some(first_protected) => file < first_protected,
            None => true,
        }
    }

    /// Lowest unprotected candidate, published as the current file.
    fn pick(&self, candidates: &FileSet) -> Option<u32> {
        let recovery_start = self.ctx.recovery_start_file();
        self.coordinator.publish_selection(|| {
            candidates
                .iter()
                .copied()
                .find(|&file| self.is_unprotected(file, recovery_start))
        })
    }

    /// Selects the next file among `candidates`, or reports why none can be erased.
    pub fn next_file(&self, candidates: &FileSet, infos: &mut FileInfoCache) -> StepResult<u32> {
        if let Some(file) = self.pick(candidates) {
            return Ok(file);
        }

        if self.ctx.environment.log_deletion_forbidden() {
            return Err(no_files(Severity::Info, "log file deletion is currently forbidden"));
        }

        let recovery_start = self.ctx.recovery_start_file();
        if candidates.iter().all(|&file| file >= recovery_start) {
            return Err(no_files(
                Severity::Info,
                format!("all remaining files are in the recovery region starting at file {recovery_start:#x}"),
            ));
        }

        if !self.ctx.environment.is_replicated() {
            return Err(no_files(Severity::Warning, "protected files are blocking erasure"));
        }

        // Newest file below the recovery region that holds a replicated entry.
        let mut truncation = None;
        for &file in candidates.range(..recovery_start).rev() {
            if let Some(vlsn) = infos.get(self.ctx, file)?.and_then(|info| info.last_vlsn) {
                truncation = Some((file, vlsn));
                break;
            }
        }
        let Some((file, vlsn)) = truncation else {
            return Err(no_files(
                Severity::Warning,
                "protected files are blocking erasure and no remaining file holds a replicated entry",
            ));
        };

        debug!(file, %vlsn, "Truncating replication index head to release files");
        if !self.ctx.vlsn_index.truncate_head(vlsn, file) {
            return Err(no_files(
                Severity::Warning,
                format!("replication index could not be truncated to file {file:#x}"),
            ));
        }
        info!(file, %vlsn, "Truncated replication index head");

        self.pick(candidates).ok_or_else(|| {
            no_files(
                Severity::Warning,
                "protected files are blocking erasure after replication index truncation",
            )
        })
    }
}

fn no_files(severity: Severity, reason: impl Into<String>) -> Interrupt {
    ControlSignal::NoUnprotectedFiles {
        severity,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockEnvironment;
    use crate::log::{LnEntry, LogEntryType, LogWriter};
    use crate::lsn::{Lsn, Vlsn};
    use crate::testing::{MemoryEngine, SimulatedClock};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        engine: Arc<MemoryEngine>,
        ctx: EngineContext,
        coordinator: Coordinator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::new(dir.path()));
        let ctx = engine.context(Arc::new(SimulatedClock::new(0)));
        Fixture {
            _dir: dir,
            engine,
            ctx,
            coordinator: Coordinator::new(),
        }
    }

    fn write_file(dir: &std::path::Path, file: u32, vlsn: Option<u64>) {
        let mut writer = LogWriter::create(dir, file, 0).unwrap();
        writer
            .append_ln(
                LogEntryType::InsLn,
                &LnEntry::new(1, &b"k"[..], &b"v"[..]),
                vlsn.map(Vlsn),
            )
            .unwrap();
        writer.finish().unwrap();
    }

    fn signal(result: StepResult<u32>) -> (Severity, String) {
        match result {
            Err(Interrupt::Signal(ControlSignal::NoUnprotectedFiles { severity, reason })) => {
                (severity, reason)
            }
            other => panic!("unexpected selection result: {other:?}"),
        }
    }

    #[test]
    fn test_picks_lowest_unprotected_and_publishes_it() {
        let fx = fixture();
        fx.engine.protect(&FileSet::from([1]));
        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let file = selector
            .next_file(&FileSet::from([1, 2, 3]), &mut FileInfoCache::new())
            .unwrap();
        assert_eq!(file, 2);
        assert_eq!(fx.coordinator.current_file(), Some(2));
    }

    #[test]
    fn test_fallbacks_not_consulted_when_a_file_is_free() {
        let fx = fixture();
        let mut environment = MockEnvironment::new();
        environment.expect_log_deletion_forbidden().never();
        environment.expect_is_replicated().never();
        let mut ctx = fx.ctx.clone();
        ctx.environment = Arc::new(environment);

        let selector = FileSelector::new(&ctx, &fx.coordinator);
        let file = selector
            .next_file(&FileSet::from([4]), &mut FileInfoCache::new())
            .unwrap();
        assert_eq!(file, 4);
    }

    #[test]
    fn test_recovery_region_is_informational() {
        let fx = fixture();
        fx.engine.set_first_active_lsn(Lsn::new(2, 100));
        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let (severity, _) = signal(selector.next_file(&FileSet::from([2, 3]), &mut FileInfoCache::new()));
        assert_eq!(severity, Severity::Info);
        assert_eq!(fx.coordinator.current_file(), None);
    }

    #[test]
    fn test_deletion_forbidden_is_informational() {
        let fx = fixture();
        fx.engine.protect(&FileSet::from([1]));
        fx.engine.forbid_deletion(true);
        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let (severity, _) = signal(selector.next_file(&FileSet::from([1]), &mut FileInfoCache::new()));
        assert_eq!(severity, Severity::Info);
    }

    #[test]
    fn test_protection_without_replication_warns() {
        let fx = fixture();
        fx.engine.protect(&FileSet::from([1, 2]));
        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let (severity, _) = signal(selector.next_file(&FileSet::from([1, 2]), &mut FileInfoCache::new()));
        assert_eq!(severity, Severity::Warning);
    }

    #[test]
    fn test_replication_index_truncated_to_newest_replicated_file() {
        let fx = fixture();
        let dir = fx.ctx.log.dir().to_path_buf();
        write_file(&dir, 1, Some(10));
        write_file(&dir, 2, Some(20));
        write_file(&dir, 3, None);
        fx.engine.set_replicated(true);
        fx.engine.set_first_protected_file(Some(1));

        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let mut infos = FileInfoCache::new();
        let file = selector.next_file(&FileSet::from([1, 2, 3]), &mut infos).unwrap();
        assert_eq!(file, 1);
        assert_eq!(fx.engine.truncations(), vec![(Vlsn(20), 2)]);
        assert!(infos.contains(3) && infos.contains(2));
    }

    #[test]
    fn test_failed_truncation_warns() {
        let fx = fixture();
        write_file(fx.ctx.log.dir(), 1, Some(10));
        fx.engine.set_replicated(true);
        fx.engine.set_first_protected_file(Some(1));
        fx.engine.allow_vlsn_truncation(false);

        let selector = FileSelector::new(&fx.ctx, &fx.coordinator);
        let (severity, reason) = signal(selector.next_file(&FileSet::from([1]), &mut FileInfoCache::new()));
        assert_eq!(severity, Severity::Warning);
        assert!(reason.contains("could not be truncated"));
    }

    #[test]
    fn test_info_cache_memoizes_and_forgets() {
        let fx = fixture();
        write_file(fx.ctx.log.dir(), 4, Some(7));
        let mut infos = FileInfoCache::new();
        let info = infos.get(&fx.ctx, 4).unwrap().unwrap();
        assert_eq!(info.last_vlsn, Some(Vlsn(7)));
        assert_eq!(infos.len(), 1);

        std::fs::remove_file(fx.ctx.log.file_path(4)).unwrap();
        assert_eq!(infos.get(&fx.ctx, 4).unwrap(), Some(info));
        infos.forget(4);
        assert_eq!(infos.get(&fx.ctx, 4).unwrap(), None);
        assert!(infos.is_empty());
    }
}
