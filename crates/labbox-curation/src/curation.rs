//! Sorting curation state and its reducer.
//!
//! State is held behind an `Arc`. A transition that changes nothing hands
//! back the same `Arc`, so consumers can detect changes with
//! [`Arc::ptr_eq`] instead of comparing whole documents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::merge::{simplify_merge_groups, MergeGroup};

/// Identifier of a sorted unit.
pub type UnitId = u64;

/// User annotations over one sorting: labels per unit and merge groups.
///
/// Merge groups are pairwise disjoint and hold at least two units. The
/// invariant is restored on deserialization and after every action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CurationDocument")]
pub struct SortingCuration {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels_by_unit: BTreeMap<UnitId, BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label_choices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    merge_groups: Vec<MergeGroup>,
}

/// Wire shape of a curation document, before simplification.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurationDocument {
    #[serde(default)]
    labels_by_unit: BTreeMap<UnitId, BTreeSet<String>>,
    #[serde(default)]
    label_choices: Option<Vec<String>>,
    #[serde(default)]
    merge_groups: Vec<MergeGroup>,
}

impl From<CurationDocument> for SortingCuration {
    fn from(doc: CurationDocument) -> Self {
        let mut labels_by_unit = doc.labels_by_unit;
        labels_by_unit.retain(|_, labels| !labels.is_empty());
        Self {
            labels_by_unit,
            label_choices: doc.label_choices,
            merge_groups: simplify_merge_groups(doc.merge_groups),
        }
    }
}

impl SortingCuration {
    /// Empty curation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the suggested label choices.
    #[must_use]
    pub fn with_label_choices(mut self, choices: Vec<String>) -> Self {
        self.label_choices = Some(choices);
        self
    }

    /// Parse a curation document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as a curation document.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Labels for every labelled unit.
    pub fn labels_by_unit(&self) -> &BTreeMap<UnitId, BTreeSet<String>> {
        &self.labels_by_unit
    }

    /// Labels of one unit, in sorted order.
    pub fn labels_for_unit(&self, unit_id: UnitId) -> impl Iterator<Item = &str> {
        self.labels_by_unit
            .get(&unit_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Whether `unit_id` carries `label`.
    pub fn has_label(&self, unit_id: UnitId, label: &str) -> bool {
        self.labels_by_unit
            .get(&unit_id)
            .is_some_and(|labels| labels.contains(label))
    }

    pub fn label_choices(&self) -> Option<&[String]> {
        self.label_choices.as_deref()
    }

    /// Disjoint merge groups.
    pub fn merge_groups(&self) -> &[MergeGroup] {
        &self.merge_groups
    }

    /// The merge group containing `unit_id`, if any.
    pub fn merge_group_for_unit(&self, unit_id: UnitId) -> Option<&MergeGroup> {
        self.merge_groups.iter().find(|group| group.contains(&unit_id))
    }
}

/// Curation actions, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CurationAction {
    /// Replace the whole curation.
    SetCuration { curation: SortingCuration },

    #[serde(rename_all = "camelCase")]
    AddLabel { unit_id: UnitId, label: String },

    #[serde(rename_all = "camelCase")]
    RemoveLabel { unit_id: UnitId, label: String },

    /// Merge units into one group (transitively with existing groups).
    #[serde(rename_all = "camelCase")]
    MergeUnits { unit_ids: Vec<UnitId> },

    /// Take units out of whatever groups hold them.
    #[serde(rename_all = "camelCase")]
    UnmergeUnits { unit_ids: Vec<UnitId> },

    /// An action type this build does not know. Applying it changes nothing.
    #[serde(other)]
    Unknown,
}

impl CurationAction {
    /// Parse an action document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Apply `action` to `state`.
///
/// Total: every action yields a valid state. No-ops return `state` itself.
pub fn reduce(state: &Arc<SortingCuration>, action: CurationAction) -> Arc<SortingCuration> {
    match action {
        CurationAction::SetCuration { curation } => {
            if **state == curation {
                return Arc::clone(state);
            }
            Arc::new(curation)
        }

        CurationAction::AddLabel { unit_id, label } => {
            if state.has_label(unit_id, &label) {
                return Arc::clone(state);
            }
            let mut next = SortingCuration::clone(state);
            next.labels_by_unit.entry(unit_id).or_default().insert(label);
            Arc::new(next)
        }

        CurationAction::RemoveLabel { unit_id, label } => {
            if !state.has_label(unit_id, &label) {
                return Arc::clone(state);
            }
            let mut next = SortingCuration::clone(state);
            if let Some(labels) = next.labels_by_unit.get_mut(&unit_id) {
                labels.remove(&label);
                if labels.is_empty() {
                    next.labels_by_unit.remove(&unit_id);
                }
            }
            Arc::new(next)
        }

        CurationAction::MergeUnits { unit_ids } => {
            let mut groups = state.merge_groups.clone();
            groups.push(unit_ids.into_iter().collect());
            with_merge_groups(state, simplify_merge_groups(groups))
        }

        CurationAction::UnmergeUnits { unit_ids } => {
            let removed: BTreeSet<UnitId> = unit_ids.into_iter().collect();
            // Members are filtered out; remaining members of a group stay
            // together even if the removed unit was what linked them.
            let groups = state
                .merge_groups
                .iter()
                .map(|group| group.difference(&removed).copied().collect())
                .collect();
            with_merge_groups(state, simplify_merge_groups(groups))
        }

        CurationAction::Unknown => {
            trace!("Ignoring unknown curation action");
            Arc::clone(state)
        }
    }
}

fn with_merge_groups(state: &Arc<SortingCuration>, groups: Vec<MergeGroup>) -> Arc<SortingCuration> {
    if groups == state.merge_groups {
        return Arc::clone(state);
    }
    let mut next = SortingCuration::clone(state);
    next.merge_groups = groups;
    Arc::new(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn group(units: &[UnitId]) -> MergeGroup {
        units.iter().copied().collect()
    }

    fn add_label(unit_id: UnitId, label: &str) -> CurationAction {
        CurationAction::AddLabel {
            unit_id,
            label: label.into(),
        }
    }

    fn merge(unit_ids: &[UnitId]) -> CurationAction {
        CurationAction::MergeUnits {
            unit_ids: unit_ids.to_vec(),
        }
    }

    fn unmerge(unit_ids: &[UnitId]) -> CurationAction {
        CurationAction::UnmergeUnits {
            unit_ids: unit_ids.to_vec(),
        }
    }

    #[test]
    fn add_label_is_idempotent() {
        let empty = Arc::new(SortingCuration::new());
        let once = reduce(&empty, add_label(3, "noise"));
        let twice = reduce(&once, add_label(3, "noise"));

        assert!(!Arc::ptr_eq(&empty, &once));
        assert!(Arc::ptr_eq(&once, &twice));
        assert!(once.has_label(3, "noise"));
    }

    #[test]
    fn labels_stay_sorted() {
        let mut state = Arc::new(SortingCuration::new());
        for label in ["reject", "MUA", "accept"] {
            state = reduce(&state, add_label(1, label));
        }
        let labels: Vec<_> = state.labels_for_unit(1).collect();
        assert_eq!(labels, vec!["MUA", "accept", "reject"]);
    }

    #[test]
    fn remove_label() {
        let state = reduce(&Arc::new(SortingCuration::new()), add_label(2, "artifact"));
        let state = reduce(&state, add_label(2, "noise"));

        let removed = reduce(
            &state,
            CurationAction::RemoveLabel {
                unit_id: 2,
                label: "artifact".into(),
            },
        );
        assert_eq!(removed.labels_for_unit(2).collect::<Vec<_>>(), vec!["noise"]);

        let missing = reduce(
            &removed,
            CurationAction::RemoveLabel {
                unit_id: 2,
                label: "artifact".into(),
            },
        );
        assert!(Arc::ptr_eq(&removed, &missing));

        let last = reduce(
            &missing,
            CurationAction::RemoveLabel {
                unit_id: 2,
                label: "noise".into(),
            },
        );
        assert!(last.labels_by_unit().is_empty());
    }

    #[test]
    fn merges_are_transitive() {
        let state = reduce(&Arc::new(SortingCuration::new()), merge(&[1, 2]));
        let state = reduce(&state, merge(&[2, 3]));
        assert_eq!(state.merge_groups(), &[group(&[1, 2, 3])]);
        assert_eq!(state.merge_group_for_unit(3), Some(&group(&[1, 2, 3])));
        assert_eq!(state.merge_group_for_unit(4), None);
    }

    #[test]
    fn unmerge_filters_members_and_drops_small_groups() {
        let state = reduce(&Arc::new(SortingCuration::new()), merge(&[1, 2]));
        let state = reduce(&state, merge(&[2, 3]));

        let state = reduce(&state, unmerge(&[2]));
        assert_eq!(state.merge_groups(), &[group(&[1, 3])]);

        let state = reduce(&state, unmerge(&[1, 3]));
        assert!(state.merge_groups().is_empty());
    }

    #[test]
    fn redundant_merge_and_unmerge_keep_state() {
        let state = reduce(&Arc::new(SortingCuration::new()), merge(&[1, 2, 3]));

        let again = reduce(&state, merge(&[3, 1]));
        assert!(Arc::ptr_eq(&state, &again));

        let unrelated = reduce(&state, unmerge(&[9]));
        assert!(Arc::ptr_eq(&state, &unrelated));

        let single = reduce(&Arc::new(SortingCuration::new()), merge(&[5]));
        assert!(single.merge_groups().is_empty());
    }

    #[test]
    fn set_curation_replaces_everything() {
        let state = reduce(&Arc::new(SortingCuration::new()), add_label(1, "noise"));
        let replacement = SortingCuration::new().with_label_choices(vec!["good".into()]);

        let next = reduce(
            &state,
            CurationAction::SetCuration {
                curation: replacement.clone(),
            },
        );
        assert_eq!(*next, replacement);
        assert!(next.labels_by_unit().is_empty());
    }

    #[test]
    fn unknown_action_is_a_no_op() {
        let state = Arc::new(SortingCuration::new());
        let action = CurationAction::from_json(r#"{"type": "SplitUnit", "unitId": 4}"#).unwrap();
        assert_eq!(action, CurationAction::Unknown);
        assert!(Arc::ptr_eq(&state, &reduce(&state, action)));
    }

    #[test]
    fn actions_use_original_wire_shape() {
        let action = CurationAction::from_json(r#"{"type": "AddLabel", "unitId": 12, "label": "MUA"}"#).unwrap();
        assert_eq!(action, add_label(12, "MUA"));

        let encoded = serde_json::to_value(merge(&[1, 2])).unwrap();
        assert_eq!(encoded, json!({"type": "MergeUnits", "unitIds": [1, 2]}));
    }

    #[test]
    fn deserialized_documents_are_simplified() {
        let curation = SortingCuration::from_json(
            r#"{"labelsByUnit": {"4": ["noise", "noise"], "5": []}, "mergeGroups": [[1, 2], [2, 3], [7]]}"#,
        )
        .unwrap();

        assert_eq!(curation.merge_groups(), &[group(&[1, 2, 3])]);
        assert_eq!(curation.labels_for_unit(4).collect::<Vec<_>>(), vec!["noise"]);
        assert!(!curation.labels_by_unit().contains_key(&5));

        let round_trip = SortingCuration::from_json(&curation.to_json().unwrap()).unwrap();
        assert_eq!(round_trip, curation);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(SortingCuration::from_json(r#"{"mergeGroups": "nope"}"#).is_err());
    }

    proptest! {
        #[test]
        fn add_label_twice_equals_once(unit in 0u64..50, label in "[a-zA-Z]{1,8}") {
            let empty = Arc::new(SortingCuration::new());
            let once = reduce(&empty, add_label(unit, &label));
            let twice = reduce(&once, add_label(unit, &label));
            prop_assert!(Arc::ptr_eq(&once, &twice));
        }

        #[test]
        fn groups_stay_disjoint_under_any_action_sequence(
            ops in prop::collection::vec((any::<bool>(), prop::collection::vec(0u64..15, 0..4)), 0..20)
        ) {
            let mut state = Arc::new(SortingCuration::new());
            for (is_merge, units) in ops {
                let action = if is_merge {
                    CurationAction::MergeUnits { unit_ids: units }
                } else {
                    CurationAction::UnmergeUnits { unit_ids: units }
                };
                state = reduce(&state, action);
                prop_assert!(crate::merge::is_simplified(state.merge_groups()));
            }
        }
    }
}
