//! Promotion of stale delta nodes.
//!
//! A delta keeps its last full version alive in the log. When that full
//! version predates the previous cycle's boundary, the node is promoted to a
//! full node so its next flush releases the old one. Only nodes the
//! classifier already visits are considered; nothing here scans the tree.

use tracing::debug;

use crate::collaborators::{LeafNode, NodePosition, TreeIndex};
use crate::log::DatabaseId;
use crate::lsn::Lsn;
use crate::metrics::EraserMetrics;

/// True when a delta whose last full version is at `last_full_lsn` is due for promotion.
pub fn is_due(is_delta: bool, last_full_lsn: Lsn, oldest_allowed_obsolete_lsn: Lsn) -> bool {
    is_delta
        && !oldest_allowed_obsolete_lsn.is_null()
        && !last_full_lsn.is_null()
        && last_full_lsn < oldest_allowed_obsolete_lsn
}

/// Ages a node found through [`TreeIndex::find_node`].
pub fn age_node(
    tree: &dyn TreeIndex,
    db: DatabaseId,
    node_id: u64,
    position: &NodePosition,
    oldest_allowed_obsolete_lsn: Lsn,
    metrics: &EraserMetrics,
) -> bool {
    if !is_due(position.is_delta, position.last_full_lsn, oldest_allowed_obsolete_lsn) {
        return false;
    }
    let promoted = tree.promote_delta(db, node_id);
    if promoted {
        debug!(db, node_id, last_full = %position.last_full_lsn, "Promoted aging delta node");
        metrics.record_delta_promoted();
    }
    promoted
}

/// Ages a leaf latched for a record lookup.
pub fn age_leaf(leaf: &mut dyn LeafNode, oldest_allowed_obsolete_lsn: Lsn, metrics: &EraserMetrics) -> bool {
    if !is_due(leaf.is_delta(), leaf.last_full_lsn(), oldest_allowed_obsolete_lsn) {
        return false;
    }
    leaf.promote_to_full();
    debug!(node_id = leaf.node_id(), "Promoted aging delta leaf");
    metrics.record_delta_promoted();
    true
}
