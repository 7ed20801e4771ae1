//! Operator-visible behaviour: what gets erased, and when the eraser keeps its hands off.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use common::config::EraserConfig;
use eraser::Lsn;
use eraser::log::LogEntryType;
use ntest::timeout;
use tests_integration::fixtures::{EraserTestContext, GatedHooks, START_MS};
use tests_integration::generators::{
    LogFileBuilder, MINUTE_MS, write_active_file, write_mixed_file,
};
use tests_integration::{init_test_logging, wait_for};

use crate::{PERIOD, enabled};

/// One deleted record and one live record in a file older than the period.
#[test]
#[timeout(60000)]
fn test_old_file_loses_exactly_its_deleted_record() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let file = LogFileBuilder::new(&ctx.log_dir(), 1, START_MS - 40 * MINUTE_MS)?
        .deleted(b"gone")?
        .live(b"kept", b"value")?
        .finish()?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;

    let running = ctx.start(enabled())?;
    wait_for("the first cycle to end", || running.hooks.cycles_ended() >= 1)?;

    assert_eq!(running.hooks.events()[0], "cycle_started {1}");
    assert!(running.hooks.events().contains(&"cycle_ended completed=true".to_string()));

    let summary = ctx.summary(&file)?;
    assert_eq!(summary.erased_entries, 1);
    assert_eq!(summary.erased_not_zeroed, 0);
    assert_eq!(summary.count_of(LogEntryType::InsLn), 1);
    assert_eq!(summary.count_of(LogEntryType::DelLn), 0);
    ctx.assert_erased(&file)?;

    assert!(running.eraser.is_lsn_erased(file.doomed[0])?);
    assert!(!running.eraser.is_lsn_erased(file.kept[0])?);
    running.stop()
}

#[test]
#[timeout(60000)]
fn test_files_younger_than_period_wait_for_a_later_cycle() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let old = write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    let young = write_mixed_file(&ctx.log_dir(), 2, START_MS, 10 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let running = ctx.start(enabled())?;
    wait_for("the old file", || running.hooks.finished(1))?;
    ctx.assert_erased(&old)?;
    ctx.assert_untouched(&young)?;

    wait_for("the young file", || running.hooks.finished(2))?;
    ctx.assert_erased(&young)?;
    let events = running.hooks.events();
    assert_eq!(events[0], "cycle_started {1}");
    assert!(events.contains(&"cycle_started {1, 2}".to_string()));
    running.stop()
}

/// Disabling mid-cycle stops all writes until erasure is enabled again.
#[test]
#[timeout(60000)]
fn test_disable_mid_cycle_stops_writes() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let first = write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    let second = write_mixed_file(&ctx.log_dir(), 2, START_MS, 40 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.hold(2);
    let running = ctx.start_with(enabled(), hooks.clone())?;
    hooks.wait_reached()?;

    running.eraser.update_config(EraserConfig::default());
    hooks.open();
    wait_for("the cycle to be abandoned", || hooks.cycles_ended() >= 1)?;
    assert!(hooks.events().contains(&"cycle_ended completed=false".to_string()));
    assert!(!running.eraser.is_enabled());

    let writes = running.eraser.metrics().writes();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(running.eraser.metrics().writes(), writes);
    ctx.assert_erased(&first)?;
    ctx.assert_untouched(&second)?;

    let state = ctx.persisted_state()?.expect("cycle state persisted");
    assert_eq!(state.completed, BTreeSet::from([1]));
    assert_eq!(state.remaining, BTreeSet::from([2]));

    running.eraser.update_config(enabled());
    wait_for("the second file", || hooks.finished(2))?;
    ctx.assert_erased(&second)?;
    running.stop()
}

/// A new period takes effect at once: the running cycle is dropped and
/// a fresh one is paced over the new period.
#[test]
#[timeout(60000)]
fn test_period_change_mid_cycle_starts_fresh_cycle() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let first = write_mixed_file(&ctx.log_dir(), 1, START_MS, 3 * 60 * MINUTE_MS)?;
    let second = write_mixed_file(&ctx.log_dir(), 2, START_MS, 3 * 60 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.hold(2);
    let running = ctx.start_with(enabled(), hooks.clone())?;
    hooks.wait_reached()?;
    ctx.assert_erased(&first)?;
    ctx.assert_untouched(&second)?;

    let mut config = enabled();
    config.period = 2 * PERIOD;
    running.eraser.update_config(config);
    hooks.open();
    wait_for("the replacement cycle", || hooks.count("cycle_started") >= 2)?;

    let events = hooks.events();
    let abandoned = events
        .iter()
        .position(|event| event == "cycle_ended completed=false")
        .expect("first cycle abandoned");
    assert_eq!(events[abandoned + 1], "cycle_started {1, 2}");
    assert!(!events[..abandoned].contains(&"file_finished 2".to_string()));

    wait_for("the second file", || hooks.finished(2))?;
    ctx.assert_erased(&second)?;
    assert_eq!(running.eraser.metrics().cycles_aborted(), 1);
    let state = ctx.persisted_state()?.expect("cycle state persisted");
    assert_eq!(state.end_time_ms - state.start_time_ms, 2 * PERIOD.as_millis() as u64);
    running.stop()
}

/// Files inside the crash-recovery region are never touched.
#[test]
#[timeout(60000)]
fn test_recovery_region_blocks_all_writes() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let first = write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    let second = write_mixed_file(&ctx.log_dir(), 2, START_MS, 40 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;
    ctx.engine.set_first_active_lsn(Lsn::new(1, 0));

    let running = ctx.start(enabled())?;
    wait_for("the cycle to end", || running.hooks.cycles_ended() >= 1)?;

    let events = running.hooks.events();
    assert_eq!(events[0], "cycle_started {1, 2}");
    assert_eq!(events[1], "cycle_ended completed=false");
    assert_eq!(running.hooks.count("before_file"), 0);
    assert_eq!(running.eraser.metrics().writes(), 0);
    ctx.assert_untouched(&first)?;
    ctx.assert_untouched(&second)?;
    running.stop()
}

/// A backup protecting the current file waits until the eraser lets go of it.
#[test]
#[timeout(60000)]
fn test_backup_aborts_erasure_of_current_file() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let protected = write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    let other = write_mixed_file(&ctx.log_dir(), 2, START_MS, 40 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.hold(1);
    let running = ctx.start_with(enabled(), hooks.clone())?;
    hooks.wait_reached()?;
    assert_eq!(running.eraser.current_file(), Some(1));

    let backup = BTreeSet::from([1]);
    ctx.engine.protect(&backup);
    let aborted = thread::scope(|scope| {
        let aborter = scope.spawn(|| running.eraser.abort_erasure(&backup));
        // Let the abort request land before the eraser moves on.
        thread::sleep(Duration::from_millis(100));
        assert!(!aborter.is_finished());
        hooks.open();
        aborter.join()
    });
    assert!(matches!(aborted, Ok(Ok(()))));
    assert_ne!(running.eraser.current_file(), Some(1));
    let before = std::fs::read(&protected.path)?;

    wait_for("the unprotected file", || hooks.finished(2))?;
    wait_for("the cycle to end", || hooks.cycles_ended() >= 1)?;
    assert_eq!(std::fs::read(&protected.path)?, before);
    ctx.assert_untouched(&protected)?;
    ctx.assert_erased(&other)?;
    assert!(hooks.events().contains(&"cycle_ended completed=false".to_string()));

    ctx.engine.unprotect(&backup);
    wait_for("the released file", || hooks.finished(1))?;
    ctx.assert_erased(&protected)?;
    running.stop()
}

#[test]
#[timeout(60000)]
fn test_abort_of_unrelated_files_returns_immediately() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    write_mixed_file(&ctx.log_dir(), 1, START_MS, 40 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.hold(1);
    let running = ctx.start_with(enabled(), hooks.clone())?;
    hooks.wait_reached()?;
    running.eraser.abort_erasure(&BTreeSet::from([7, 8]))?;
    assert_eq!(running.eraser.current_file(), Some(1));

    hooks.open();
    wait_for("the file", || hooks.finished(1))?;
    assert_eq!(PERIOD, running.eraser.config().config.period);
    running.stop()
}
