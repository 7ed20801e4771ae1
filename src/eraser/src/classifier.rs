//! Decides, entry by entry, whether a log entry is obsolete.
//!
//! Checks run from cheapest to most expensive:
//!
//! 1. erased and zeroed: skipped
//! 2. erased but not zeroed (interrupted erasure): zeroed again
//! 3. offset tracked as obsolete by the utilization tracker
//! 4. owning database deleted (kept while the deletion is still running)
//! 5. leaf records: deletion markers, immediately obsolete records, expired records
//! 6. leaf records: extinction filter
//! 7. tree lookup: the entry is obsolete when the tree references a different
//!    version that is older than the recovery boundary
//!
//! Records that reach step 7 are parked in the look-ahead cache and resolved
//! in groups sharing a leaf node.

use std::collections::BTreeSet;

use common::config::EraserConfig;
use tracing::trace;

use crate::aging;
use crate::collaborators::{DatabaseState, EngineContext, ExtinctionStatus, LeafNode, NodeLookup};
use crate::error::{ControlSignal, StepResult};
use crate::log::{DatabaseId, LnEntry, LogEntryType, LogItem, NodeEntry};
use crate::lookahead::{LookAheadCache, PendingLeaf};
use crate::lsn::Lsn;
use crate::metrics::EraserMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseReason {
    /// Type already flipped but payload not zeroed.
    InterruptedErasure,
    KnownObsolete,
    DeletedDatabase,
    DeletedRecord,
    ImmediatelyObsolete,
    Expired,
    Extinct,
    /// The tree references a newer version older than the recovery boundary.
    Superseded,
    AbandonedRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Already erased; not counted again.
    AlreadyErased,
    Keep,
    Erase(EraseReason),
    /// Needs a tree lookup; park in the look-ahead cache.
    NeedsLookup(LnEntry),
}

impl Verdict {
    pub fn is_erase(&self) -> bool {
        matches!(self, Verdict::Erase(_))
    }
}

/// Per-file classification state.
pub struct Classifier<'a> {
    ctx: &'a EngineContext,
    config: &'a EraserConfig,
    metrics: &'a EraserMetrics,
    file_number: u32,
    /// Snapshot taken when the file is opened.
    known_obsolete: BTreeSet<u32>,
    first_active_lsn: Lsn,
    oldest_allowed_obsolete_lsn: Lsn,
    now_ms: u64,
    suspects: Vec<u32>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        config: &'a EraserConfig,
        metrics: &'a EraserMetrics,
        file_number: u32,
        oldest_allowed_obsolete_lsn: Lsn,
    ) -> Self {
        let known_obsolete = if config.erases_known_obsolete() {
            ctx.tracker.obsolete_offsets(file_number)
        } else {
            BTreeSet::new()
        };
        Self {
            ctx,
            config,
            metrics,
            file_number,
            known_obsolete,
            first_active_lsn: ctx.checkpoint.first_active_lsn(),
            oldest_allowed_obsolete_lsn,
            now_ms: ctx.clock.now_ms(),
            suspects: Vec::new(),
        }
    }

    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    /// Offsets that could not be proven obsolete.
    pub fn take_suspects(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.suspects)
    }

    pub fn classify(&mut self, item: &LogItem) -> StepResult<Verdict> {
        let entry_type = item.entry_type();
        if entry_type == LogEntryType::Erased {
            return Ok(if item.payload_is_zeroed() {
                Verdict::AlreadyErased
            } else {
                Verdict::Erase(EraseReason::InterruptedErasure)
            });
        }
        if !entry_type.is_erasable() {
            return Ok(Verdict::Keep);
        }

        if self.config.erases_known_obsolete() && self.known_obsolete.contains(&item.lsn.offset()) {
            return Ok(Verdict::Erase(EraseReason::KnownObsolete));
        }

        if entry_type.is_leaf_record() {
            let ln = LnEntry::decode(item.payload.clone(), item.lsn)?;
            if let Some(verdict) = self.check_database(ln.db_id) {
                return Ok(verdict);
            }
            self.classify_leaf(item, ln)
        } else {
            let node = NodeEntry::decode(item.payload.clone(), item.lsn)?;
            if let Some(verdict) = self.check_database(node.db_id) {
                return Ok(verdict);
            }
            if !self.config.erases_all_obsolete() {
                return Ok(Verdict::Keep);
            }
            Ok(self.classify_node(item.lsn, &node))
        }
    }

    fn check_database(&self, db: DatabaseId) -> Option<Verdict> {
        if !self.config.erases_deleted_databases() {
            return None;
        }
        match self.ctx.catalog.database_state(db) {
            DatabaseState::Open => None,
            // Reclassified once the deletion finishes.
            DatabaseState::Deleting => Some(Verdict::Keep),
            DatabaseState::Deleted => Some(Verdict::Erase(EraseReason::DeletedDatabase)),
        }
    }

    fn classify_leaf(&mut self, item: &LogItem, ln: LnEntry) -> StepResult<Verdict> {
        if self.config.erases_known_obsolete() {
            if item.entry_type().is_deleted_record() {
                return Ok(Verdict::Erase(EraseReason::DeletedRecord));
            }
            if ln.embedded {
                return Ok(Verdict::Erase(EraseReason::ImmediatelyObsolete));
            }
            if ln.has_expiration() && self.is_expired(ln.expiration_ms) {
                // Never wait for the lock; the record comes up again next cycle.
                if self.ctx.locks.is_locked(item.lsn) {
                    trace!(lsn = %item.lsn, "Expired record is locked, skipping");
                    return Ok(Verdict::Keep);
                }
                return Ok(Verdict::Erase(EraseReason::Expired));
            }
        }

        if self.config.erases_extinct_records() {
            match self.ctx.extinction.status(ln.db_id, &ln.key) {
                ExtinctionStatus::Extinct => return Ok(Verdict::Erase(EraseReason::Extinct)),
                ExtinctionStatus::Unknown => {
                    return Err(ControlSignal::DeferFile {
                        reason: format!(
                            "extinction status unknown for database {} at {}",
                            ln.db_id, item.lsn
                        ),
                    }
                    .into());
                }
                ExtinctionStatus::NotExtinct => {}
            }
        }

        if self.config.erases_all_obsolete() {
            return Ok(Verdict::NeedsLookup(ln));
        }
        Ok(Verdict::Keep)
    }

    fn is_expired(&self, expiration_ms: u64) -> bool {
        let grace_ms = self.config.expiration_grace.as_millis() as u64;
        self.now_ms >= expiration_ms.saturating_add(grace_ms)
    }

    /// Obsolete when the tree references another version that recovery no
    /// longer needs.
    fn judge(&self, entry_lsn: Lsn, current_lsn: Lsn) -> Verdict {
        if current_lsn == entry_lsn || self.first_active_lsn.is_null() {
            return Verdict::Keep;
        }
        if current_lsn < self.first_active_lsn {
            Verdict::Erase(EraseReason::Superseded)
        } else {
            Verdict::Keep
        }
    }

    fn suspect(&mut self, lsn: Lsn) -> Verdict {
        self.suspects.push(lsn.offset());
        Verdict::Keep
    }

    fn classify_node(&mut self, lsn: Lsn, node: &NodeEntry) -> Verdict {
        match self.ctx.tree.find_node(node.db_id, node) {
            NodeLookup::Found(position) => {
                let verdict = if position.is_delta && position.last_full_lsn == lsn {
                    // The current delta is applied on top of this full version.
                    Verdict::Keep
                } else {
                    self.judge(lsn, position.current_lsn)
                };
                aging::age_node(
                    self.ctx.tree.as_ref(),
                    node.db_id,
                    node.node_id,
                    &position,
                    self.oldest_allowed_obsolete_lsn,
                    self.metrics,
                );
                verdict
            }
            NodeLookup::AbandonedRoot if node.is_root => Verdict::Erase(EraseReason::AbandonedRoot),
            NodeLookup::AbandonedRoot | NodeLookup::NotFound => self.suspect(lsn),
        }
    }

    /// Resolves the oldest parked record together with every other parked
    /// record in the same leaf, under a single latch.
    pub fn resolve_leaf_group(&mut self, cache: &mut LookAheadCache) -> Vec<(PendingLeaf, Verdict)> {
        let Some(first) = cache.pop_first() else {
            return Vec::new();
        };
        let db = first.ln.db_id;
        let key = first.ln.key.clone();
        let oldest_allowed = self.oldest_allowed_obsolete_lsn;
        let metrics = self.metrics;

        let mut first = Some(first);
        let mut resolved: Vec<(PendingLeaf, Option<Lsn>)> = Vec::new();
        self.ctx.tree.with_leaf(db, &key, &mut |leaf: &mut dyn LeafNode| {
            let mut members: Vec<PendingLeaf> = first.take().into_iter().collect();
            members.extend(cache.take_matching(|p| p.ln.db_id == db && leaf.covers(&p.ln.key)));
            for member in members {
                let slot = leaf.slot_lsn(&member.ln.key);
                resolved.push((member, slot));
            }
            aging::age_leaf(leaf, oldest_allowed, metrics);
        });
        // No tree for the database: nothing to compare against.
        if let Some(first) = first {
            resolved.push((first, None));
        }

        resolved
            .into_iter()
            .map(|(member, slot)| {
                let verdict = match slot {
                    Some(current) => self.judge(member.lsn, current),
                    None => self.suspect(member.lsn),
                };
                (member, verdict)
            })
            .collect()
    }
}
