use crate::models::{RelationDiff, RemoteAssociationRecord};
use std::collections::{BTreeSet, HashMap};

/// Partition the desired counterpart set against the remotely observed one.
///
/// `to_add` are desired ids with no remote record, `to_remove` are remote
/// records no longer desired, `unchanged` is the intersection. The three
/// outputs are pairwise disjoint and sorted.
pub fn compute_diff(
    desired: &BTreeSet<String>,
    observed: &HashMap<String, RemoteAssociationRecord>,
) -> RelationDiff {
    let to_add: Vec<String> = desired
        .iter()
        .filter(|id| !observed.contains_key(*id))
        .cloned()
        .collect();

    let mut to_remove: Vec<String> = observed
        .keys()
        .filter(|id| !desired.contains(*id))
        .cloned()
        .collect();
    to_remove.sort();

    let mut unchanged: Vec<String> = observed
        .keys()
        .filter(|id| desired.contains(*id))
        .cloned()
        .collect();
    unchanged.sort();

    RelationDiff {
        to_add,
        to_remove,
        unchanged,
    }
}
