//! Bounded queue of leaf records awaiting a tree lookup.
//!
//! Records that need the tree are parked here instead of being looked up one
//! by one. When the queue is full, the oldest record's leaf is latched once
//! and every other queued record in that leaf is resolved with it.

use std::collections::BTreeMap;

use crate::log::LnEntry;
use crate::lsn::Lsn;
use crate::rewrite::EraseTarget;

/// Fixed per-record overhead counted against the cache size.
const ENTRY_OVERHEAD: usize = 64;

#[derive(Debug, Clone)]
pub struct PendingLeaf {
    pub lsn: Lsn,
    pub target: EraseTarget,
    pub ln: LnEntry,
}

impl PendingLeaf {
    fn memory_size(&self) -> usize {
        ENTRY_OVERHEAD + self.ln.key.len() + self.ln.data.len()
    }
}

#[derive(Debug)]
pub struct LookAheadCache {
    /// Keyed by file offset, so the oldest record is resolved first.
    pending: BTreeMap<u32, PendingLeaf>,
    used_bytes: usize,
    max_bytes: usize,
}

impl LookAheadCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            used_bytes: 0,
            max_bytes,
        }
    }

    pub fn add(&mut self, leaf: PendingLeaf) {
        self.used_bytes += leaf.memory_size();
        if let Some(replaced) = self.pending.insert(leaf.lsn.offset(), leaf) {
            self.used_bytes -= replaced.memory_size();
        }
    }

    pub fn is_full(&self) -> bool {
        self.used_bytes >= self.max_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Removes the record with the lowest offset.
    pub fn pop_first(&mut self) -> Option<PendingLeaf> {
        let (_, leaf) = self.pending.pop_first()?;
        self.used_bytes -= leaf.memory_size();
        Some(leaf)
    }

    /// Removes and returns every queued record matching `pred`, in offset order.
    pub fn take_matching(&mut self, mut pred: impl FnMut(&PendingLeaf) -> bool) -> Vec<PendingLeaf> {
        let offsets: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, leaf)| pred(leaf))
            .map(|(offset, _)| *offset)
            .collect();
        let mut taken = Vec::with_capacity(offsets.len());
        for offset in offsets {
            if let Some(leaf) = self.pending.remove(&offset) {
                self.used_bytes -= leaf.memory_size();
                taken.push(leaf);
            }
        }
        taken
    }
}
