//! Mastership and shard assignment derived from sibling server nodes.
//!
//! Server nodes are sequential, so their names end in `_<digits>` and the
//! digits grow with creation order. Siblings are ranked by the integer value
//! of that suffix; names without one sort after every sequenced name, by
//! name. Rank 0 is the master and the rank doubles as the shard index.

use std::cmp::Ordering;
use svc_registry::path;

/// Integer sequence suffix of a node name, if it has one.
pub fn sequence_of(name: &str) -> Option<u64> {
    let (_, suffix) = name.rsplit_once('_')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

fn creation_order(a: &str, b: &str) -> Ordering {
    match (sequence_of(a), sequence_of(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Sort sibling names into creation order.
pub fn sort_by_sequence(children: &mut [String]) {
    children.sort_by(|a, b| creation_order(a, b));
}

/// Zero-based rank of `own_node` (a name or a full path) among `children`.
pub fn rank(own_node: &str, children: &[String]) -> Option<usize> {
    let own = path::base_name(own_node);
    if own.is_empty() {
        return None;
    }
    let mut sorted = children.to_vec();
    sort_by_sequence(&mut sorted);
    sorted.iter().position(|name| name == own)
}

/// `(sharding, is_master)` for `own_node`.
///
/// `sharding` is the rank, or `-1` when the node is not among the siblings,
/// in which case the instance is never master.
pub fn get_sharding(own_node: &str, children: &[String]) -> (i64, bool) {
    match rank(own_node, children) {
        Some(rank) => (rank as i64, rank == 0),
        None => (-1, false),
    }
}
