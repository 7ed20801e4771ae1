//! Properties that hold across cycles: no double erasure, pacing over the
//! whole period, and the classes of obsolete data that are destroyed.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use eraser::collaborators::DatabaseState;
use eraser::scheduler::WORK_PER_BYTE;
use ntest::timeout;
use tests_integration::fixtures::{EraserTestContext, GatedHooks, START_MS};
use tests_integration::generators::{
    DEFAULT_DB, LogFileBuilder, MINUTE_MS, write_active_file, write_mixed_file,
};
use tests_integration::{init_test_logging, wait_for};

use crate::{PERIOD, enabled};

#[test]
#[timeout(60000)]
fn test_second_pass_erases_nothing_new() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let file = LogFileBuilder::new(&ctx.log_dir(), 1, START_MS - 40 * MINUTE_MS)?
        .deleted_many(3)?
        .expired(b"stale", b"value")?
        .live(b"kept", b"value")?
        .finish()?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;

    let running = ctx.start(enabled())?;
    wait_for("two passes over the file", || running.hooks.count("file_finished 1") >= 2)?;

    let metrics = running.eraser.metrics();
    assert_eq!(metrics.entries_erased(), 4);
    assert_eq!(metrics.entries_rezeroed(), 0);
    assert!(metrics.files_erased() >= 2);
    assert!(metrics.cycles_completed() >= 1);

    let summary = ctx.summary(&file)?;
    assert_eq!(summary.erased_entries, 4);
    assert_eq!(summary.erased_not_zeroed, 0);
    ctx.assert_erased(&file)?;
    running.stop()
}

/// The cycle takes every eligible file, estimates three units of work per
/// byte and never finishes before its period is over.
#[test]
#[timeout(60000)]
fn test_cycle_spans_its_period() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let old = write_mixed_file(&ctx.log_dir(), 1, START_MS, 50 * MINUTE_MS)?;
    write_mixed_file(&ctx.log_dir(), 2, START_MS, 20 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.hold(1);
    let running = ctx.start_with(enabled(), hooks.clone())?;
    hooks.wait_reached()?;

    let state = ctx.persisted_state()?.expect("cycle state persisted");
    assert_eq!(state.start_time_ms, START_MS);
    assert_eq!(state.end_time_ms, START_MS + PERIOD.as_millis() as u64);
    assert_eq!(state.total_work, WORK_PER_BYTE * old.length);
    assert_eq!(state.remaining, BTreeSet::from([1]));
    assert!(state.completed.is_empty());

    hooks.open();
    wait_for("the next cycle", || hooks.count("cycle_started") >= 2)?;
    assert!(running.eraser.metrics().cycle_start_ms() >= START_MS + PERIOD.as_millis() as u64);
    assert!(hooks.events().contains(&"cycle_started {1, 2}".to_string()));
    assert!(hooks.events().contains(&"cycle_ended completed=true".to_string()));
    running.stop()
}

#[test]
#[timeout(60000)]
fn test_records_of_deleted_database_are_erased() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let file = LogFileBuilder::new(&ctx.log_dir(), 1, START_MS - 40 * MINUTE_MS)?
        .live(b"a", b"one")?
        .live(b"b", b"two")?
        .finish()?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;
    ctx.engine.set_database_state(DEFAULT_DB, DatabaseState::Deleted);

    let running = ctx.start(enabled())?;
    wait_for("the file", || running.hooks.finished(1))?;
    for &lsn in &file.kept {
        assert!(ctx.is_erased(lsn)?);
    }
    assert_eq!(ctx.summary(&file)?.erased_entries, 2);
    running.stop()
}

#[test]
#[timeout(60000)]
fn test_reserved_file_is_deleted_instead_of_rewritten() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let reserved = write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;
    ctx.engine.mark_reserved(1);

    let running = ctx.start(enabled())?;
    wait_for("the reserved file", || running.hooks.finished(1))?;
    assert!(!reserved.path.exists());
    assert_eq!(running.eraser.metrics().files_deleted_reserved(), 1);
    assert_eq!(running.eraser.metrics().writes(), 0);
    running.stop()
}

#[test]
#[timeout(60000)]
fn test_known_obsolete_record_is_erased() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let file = LogFileBuilder::new(&ctx.log_dir(), 1, START_MS - 40 * MINUTE_MS)?
        .live(b"old", b"version")?
        .live(b"new", b"version")?
        .finish()?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;
    ctx.engine.mark_obsolete(file.kept[0]);

    let running = ctx.start(enabled())?;
    wait_for("the file", || running.hooks.finished(1))?;
    assert!(ctx.is_erased(file.kept[0])?);
    assert!(!ctx.is_erased(file.kept[1])?);
    running.stop()
}
