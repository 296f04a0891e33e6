//! Merge-group simplification.
//!
//! Groups that share a unit are unioned until no two groups intersect, then
//! groups with fewer than two members are dropped. Applied after every
//! mutation, this keeps groups pairwise disjoint and makes merging
//! transitive: {1,2} plus {2,3} becomes {1,2,3}.

use std::collections::BTreeSet;

use crate::curation::UnitId;

/// A set of units the user wants treated as one.
pub type MergeGroup = BTreeSet<UnitId>;

/// Smallest group worth keeping.
pub const MIN_GROUP_SIZE: usize = 2;

/// Union intersecting groups to a fixpoint and drop undersized groups.
///
/// Surviving groups keep the position of their earliest member group.
pub fn simplify_merge_groups(mut groups: Vec<MergeGroup>) -> Vec<MergeGroup> {
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                if !groups[i].is_disjoint(&groups[j]) {
                    let absorbed = std::mem::take(&mut groups[j]);
                    groups[i].extend(absorbed);
                    changed = true;
                }
            }
        }
    }
    groups.retain(|group| group.len() >= MIN_GROUP_SIZE);
    groups
}

/// Whether no unit appears in two groups and every group is large enough.
pub fn is_simplified(groups: &[MergeGroup]) -> bool {
    let mut seen = BTreeSet::new();
    groups.iter().all(|group| {
        group.len() >= MIN_GROUP_SIZE && group.iter().all(|unit| seen.insert(*unit))
    })
}
