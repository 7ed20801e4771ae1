//! Restarts: cycle resumption and repair of interrupted rewrites.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use eraser::log::LogEntryType;
use ntest::timeout;
use tests_integration::fixtures::{EraserTestContext, GatedHooks, START_MS};
use tests_integration::generators::{
    LogFileBuilder, MINUTE_MS, write_active_file, write_mixed_file,
};
use tests_integration::{init_test_logging, wait_for};

use crate::{PERIOD, enabled};

/// Events of the first cycle only.
fn first_cycle(events: Vec<String>) -> Vec<String> {
    let end = events
        .iter()
        .position(|event| event.starts_with("cycle_ended"))
        .map_or(events.len(), |i| i + 1);
    events.into_iter().take(end).collect()
}

#[test]
#[timeout(60000)]
fn test_restart_resumes_cycle_where_it_stopped() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let files = (1..=3)
        .map(|n| write_mixed_file(&ctx.log_dir(), n, START_MS, 40 * MINUTE_MS))
        .collect::<Result<Vec<_>>>()?;
    write_active_file(&ctx.log_dir(), 4, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.fail_at(2);
    let crashed = ctx.start_with(enabled(), hooks)?;
    wait_for("the injected crash", || ctx.engine.invalidated().is_some())?;
    assert!(crashed.stop().is_err());

    ctx.assert_erased(&files[0])?;
    ctx.assert_untouched(&files[1])?;
    let state = ctx.persisted_state()?.expect("cycle state persisted");
    assert_eq!(state.start_time_ms, START_MS);
    assert_eq!(state.end_time_ms, START_MS + PERIOD.as_millis() as u64);
    assert_eq!(state.completed, BTreeSet::from([1]));
    assert_eq!(state.remaining, BTreeSet::from([2, 3]));

    let resumed = ctx.start(enabled())?;
    wait_for("the resumed cycle to end", || resumed.hooks.cycles_ended() >= 1)?;
    let events = first_cycle(resumed.hooks.events());
    assert_eq!(events[0], "cycle_started {2, 3}");
    assert!(!events.contains(&"before_file 1".to_string()));
    assert!(events.contains(&"file_finished 2".to_string()));
    assert!(events.contains(&"file_finished 3".to_string()));

    for file in &files {
        ctx.assert_erased(file)?;
    }
    resumed.stop()
}

#[test]
#[timeout(60000)]
fn test_crash_between_type_flip_and_zeroing_is_repaired() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let file = LogFileBuilder::new(&ctx.log_dir(), 1, START_MS - 40 * MINUTE_MS)?
        .deleted_many(5)?
        .live(b"kept", b"value")?
        .finish()?;
    write_active_file(&ctx.log_dir(), 2, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.crash_after_flip(true);
    let crashed = ctx.start_with(enabled(), hooks)?;
    wait_for("the injected crash", || ctx.engine.invalidated().is_some())?;
    assert!(crashed.stop().is_err());

    // Types are flipped, payloads still hold the old bytes.
    let summary = ctx.summary(&file)?;
    assert_eq!(summary.erased_entries, 5);
    assert_eq!(summary.erased_not_zeroed, 5);
    for &lsn in &file.doomed {
        assert!(ctx.is_erased(lsn)?);
    }

    let repaired = ctx.start(enabled())?;
    wait_for("the file to be repaired", || repaired.hooks.finished(1))?;
    let metrics = repaired.eraser.metrics();
    assert_eq!(metrics.entries_rezeroed(), 5);
    assert_eq!(metrics.entries_erased(), 0);

    let summary = ctx.summary(&file)?;
    assert_eq!(summary.erased_entries, 5);
    assert_eq!(summary.erased_not_zeroed, 0);
    assert_eq!(summary.count_of(LogEntryType::InsLn), 1);
    ctx.assert_erased(&file)?;
    repaired.stop()
}

#[test]
#[timeout(60000)]
fn test_restart_with_new_period_starts_fresh_cycle() -> Result<()> {
    init_test_logging();
    let ctx = EraserTestContext::new()?;
    let first = write_mixed_file(&ctx.log_dir(), 1, START_MS, 3 * 60 * MINUTE_MS)?;
    let second = write_mixed_file(&ctx.log_dir(), 2, START_MS, 3 * 60 * MINUTE_MS)?;
    write_active_file(&ctx.log_dir(), 3, START_MS)?;

    let hooks = Arc::new(GatedHooks::new());
    hooks.fail_at(2);
    let crashed = ctx.start_with(enabled(), hooks)?;
    wait_for("the injected crash", || ctx.engine.invalidated().is_some())?;
    assert!(crashed.stop().is_err());
    ctx.assert_untouched(&second)?;

    let mut config = enabled();
    config.period = 2 * PERIOD;
    let restarted = ctx.start(config)?;
    wait_for("the second file", || restarted.hooks.finished(2))?;
    let events = restarted.hooks.events();
    assert_eq!(events[0], "cycle_started {1, 2}");
    assert!(restarted.eraser.metrics().cycle_start_ms() > START_MS);
    ctx.assert_erased(&first)?;
    ctx.assert_erased(&second)?;
    restarted.stop()
}
