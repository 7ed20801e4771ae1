//! Erasure of a single log file.
//!
//! Entries are read in order, classified, and queued for rewriting. Every
//! entry costs work for its read, its classification and (if erased) its
//! rewrite, which is what the cycle's 3x work estimate accounts for.

use std::path::Path;

use common::config::EraserConfig;
use tracing::{debug, trace};

use crate::classifier::{Classifier, Verdict};
use crate::collaborators::EngineContext;
use crate::error::{EraserResult, StepResult};
use crate::log::FileReader;
use crate::lookahead::{LookAheadCache, PendingLeaf};
use crate::lsn::Lsn;
use crate::metrics::EraserMetrics;
use crate::rewrite::{EraseTarget, FileRewriter};
use crate::throttle::Pacer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was scanned to the end.
    Erased { erased: u64, rezeroed: u64 },
    /// The file disappeared before or while it was processed.
    Vanished,
}

/// Scans file `file_number` and erases every entry proven obsolete.
pub fn erase_file(
    ctx: &EngineContext,
    pacer: &mut Pacer<'_>,
    metrics: &EraserMetrics,
    config: &EraserConfig,
    file_number: u32,
    oldest_allowed_obsolete_lsn: Lsn,
) -> StepResult<FileOutcome> {
    let path = ctx.log.file_path(file_number);
    let mut classifier = Classifier::new(
        ctx,
        config,
        metrics,
        file_number,
        oldest_allowed_obsolete_lsn,
    );
    let outcome = scan(ctx, pacer, metrics, config, &mut classifier, &path);

    // On every exit, unwinds included.
    let suspects = classifier.take_suspects();
    if !suspects.is_empty() {
        debug!(file = file_number, count = suspects.len(), "Transferring suspect offsets");
        ctx.tracker.transfer_suspects(file_number, &suspects);
        metrics.record_suspects_transferred(suspects.len() as u64);
    }
    outcome
}

fn scan(
    ctx: &EngineContext,
    pacer: &mut Pacer<'_>,
    metrics: &EraserMetrics,
    config: &EraserConfig,
    classifier: &mut Classifier<'_>,
    path: &Path,
) -> StepResult<FileOutcome> {
    let file_number = classifier.file_number();
    let mut reader = match FileReader::open(path, file_number) {
        Ok(reader) => reader,
        Err(e) if e.is_file_not_found() => return Ok(FileOutcome::Vanished),
        Err(e) => return Err(e.into()),
    };
    let mut rewriter = FileRewriter::new(
        path,
        file_number,
        config.max_batch_entries,
        metrics,
        ctx.hooks.as_ref(),
    );
    let mut cache = LookAheadCache::new(config.lookahead_cache_size);

    loop {
        pacer.checkpoint()?;
        let Some(item) = reader.next_entry()? else {
            break;
        };
        ctx.evictor.critical_eviction();
        let size = item.total_size();
        metrics.record_read(size);
        pacer.throttle(size)?;

        match classifier.classify(&item)? {
            Verdict::AlreadyErased | Verdict::Keep => pacer.throttle(size)?,
            Verdict::Erase(reason) => {
                trace!(lsn = %item.lsn, ?reason, "Erasing entry");
                pacer.throttle(size)?;
                if queue(&mut rewriter, pacer, EraseTarget::for_item(&item))? {
                    return Ok(FileOutcome::Vanished);
                }
            }
            Verdict::NeedsLookup(ln) => {
                cache.add(PendingLeaf {
                    lsn: item.lsn,
                    target: EraseTarget::for_item(&item),
                    ln,
                });
                while cache.is_full() {
                    if resolve_group(classifier, &mut cache, &mut rewriter, pacer)? {
                        return Ok(FileOutcome::Vanished);
                    }
                }
            }
        }
    }

    while !cache.is_empty() {
        if resolve_group(classifier, &mut cache, &mut rewriter, pacer)? {
            return Ok(FileOutcome::Vanished);
        }
    }

    match flushed(rewriter.finish())? {
        Some((erased, rezeroed)) => Ok(FileOutcome::Erased { erased, rezeroed }),
        None => Ok(FileOutcome::Vanished),
    }
}

/// Resolves one leaf group from the look-ahead cache. Returns true when the
/// file vanished while being rewritten.
fn resolve_group(
    classifier: &mut Classifier<'_>,
    cache: &mut LookAheadCache,
    rewriter: &mut FileRewriter<'_>,
    pacer: &mut Pacer<'_>,
) -> StepResult<bool> {
    for (pending, verdict) in classifier.resolve_leaf_group(cache) {
        pacer.throttle(entry_size(&pending.target))?;
        if let Verdict::Erase(reason) = verdict {
            trace!(lsn = %pending.lsn, ?reason, "Erasing record after tree lookup");
            if queue(rewriter, pacer, pending.target)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Queues `target`, flushing a full batch. Returns true when the file vanished.
fn queue(rewriter: &mut FileRewriter<'_>, pacer: &mut Pacer<'_>, target: EraseTarget) -> StepResult<bool> {
    rewriter.queue(target);
    if !rewriter.is_batch_full() {
        return Ok(false);
    }
    match flushed(rewriter.flush())? {
        Some(stats) => {
            pacer.throttle(stats.bytes_written)?;
            Ok(false)
        }
        None => Ok(true),
    }
}

/// Maps a vanished file onto `None`; any other failure is fatal.
fn flushed<T>(result: EraserResult<T>) -> StepResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_file_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn entry_size(target: &EraseTarget) -> u64 {
    (target.payload_offset - target.offset + target.payload_size) as u64
}
