//! Sorting selection: a recording selection plus unit selection and
//! visibility.

use std::collections::BTreeSet;
use std::sync::Arc;

use labbox_curation::UnitId;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::recording::{self, RecordingSelection, RecordingSelectionAction};

/// Which units are shown. Serialized as `null` for all units.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<BTreeSet<UnitId>>", into = "Option<BTreeSet<UnitId>>")]
pub enum VisibleUnits {
    #[default]
    All,
    Only(BTreeSet<UnitId>),
}

impl VisibleUnits {
    pub fn contains(&self, unit_id: UnitId) -> bool {
        match self {
            Self::All => true,
            Self::Only(units) => units.contains(&unit_id),
        }
    }
}

impl From<Option<BTreeSet<UnitId>>> for VisibleUnits {
    fn from(units: Option<BTreeSet<UnitId>>) -> Self {
        units.map_or(Self::All, Self::Only)
    }
}

impl From<VisibleUnits> for Option<BTreeSet<UnitId>> {
    fn from(visible: VisibleUnits) -> Self {
        match visible {
            VisibleUnits::All => None,
            VisibleUnits::Only(units) => Some(units),
        }
    }
}

/// What the user is looking at within a sorting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortingSelection {
    #[serde(flatten)]
    pub recording: RecordingSelection,
    #[serde(default)]
    pub selected_unit_ids: BTreeSet<UnitId>,
    #[serde(default)]
    pub visible_unit_ids: VisibleUnits,
}

impl SortingSelection {
    pub fn is_selected(&self, unit_id: UnitId) -> bool {
        self.selected_unit_ids.contains(&unit_id)
    }
}

/// Mutations of a [`SortingSelection`].
///
/// On the wire every action is one flat object tagged by `type`: unit
/// actions and recording actions share the same namespace. A `type` neither
/// family knows lands in [`RecordingSelectionAction::Unknown`] and changes
/// nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortingSelectionAction {
    Unit(UnitSelectionAction),
    Recording(RecordingSelectionAction),
}

/// Actions on the unit selection of a sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum UnitSelectionAction {
    SetSelection {
        selection: SortingSelection,
    },
    SetSelectedUnitIds {
        selected_unit_ids: BTreeSet<UnitId>,
    },
    SetVisibleUnitIds {
        #[serde(default)]
        visible_unit_ids: VisibleUnits,
    },
    UnitClicked {
        unit_id: UnitId,
        #[serde(default)]
        ctrl_key: bool,
        #[serde(default)]
        shift_key: bool,
    },
}

impl From<UnitSelectionAction> for SortingSelectionAction {
    fn from(action: UnitSelectionAction) -> Self {
        Self::Unit(action)
    }
}

impl From<RecordingSelectionAction> for SortingSelectionAction {
    fn from(action: RecordingSelectionAction) -> Self {
        Self::Recording(action)
    }
}

/// Apply `action` at wall-clock time `now_ms`.
///
/// Returns `state` itself (same allocation) when nothing changed.
pub fn reduce_sorting(
    state: &Arc<SortingSelection>,
    action: SortingSelectionAction,
    now_ms: u64,
) -> Arc<SortingSelection> {
    let mut next = SortingSelection::clone(state);
    match action {
        SortingSelectionAction::Unit(action) => apply_unit(&mut next, action),
        SortingSelectionAction::Recording(action) => {
            match recording::apply(&state.recording, action, now_ms) {
                Some(recording) => next.recording = recording,
                None => return Arc::clone(state),
            }
        }
    }

    if next == **state {
        Arc::clone(state)
    } else {
        Arc::new(next)
    }
}

fn apply_unit(next: &mut SortingSelection, action: UnitSelectionAction) {
    match action {
        UnitSelectionAction::SetSelection { selection } => *next = selection,
        UnitSelectionAction::SetSelectedUnitIds { selected_unit_ids } => {
            next.selected_unit_ids = selected_unit_ids;
        }
        UnitSelectionAction::SetVisibleUnitIds { visible_unit_ids } => {
            next.visible_unit_ids = visible_unit_ids;
        }
        UnitSelectionAction::UnitClicked {
            unit_id,
            ctrl_key,
            shift_key,
        } => {
            if shift_key {
                trace!(unit_id, "Shift-click range selection is not supported");
            }
            if ctrl_key {
                if !next.selected_unit_ids.remove(&unit_id) {
                    next.selected_unit_ids.insert(unit_id);
                }
            } else {
                next.selected_unit_ids = BTreeSet::from([unit_id]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn selected(units: &[UnitId]) -> Arc<SortingSelection> {
        Arc::new(SortingSelection {
            selected_unit_ids: units.iter().copied().collect(),
            ..Default::default()
        })
    }

    fn click(unit_id: UnitId, ctrl_key: bool) -> SortingSelectionAction {
        UnitSelectionAction::UnitClicked {
            unit_id,
            ctrl_key,
            shift_key: false,
        }
        .into()
    }

    #[test]
    fn plain_click_selects_only_that_unit() {
        let next = reduce_sorting(&selected(&[1, 3]), click(7, false), 0);
        assert_eq!(next.selected_unit_ids, BTreeSet::from([7]));
    }

    #[test]
    fn ctrl_click_toggles() {
        let next = reduce_sorting(&selected(&[1, 3]), click(3, true), 0);
        assert_eq!(next.selected_unit_ids, BTreeSet::from([1]));

        let next = reduce_sorting(&next, click(5, true), 0);
        assert_eq!(next.selected_unit_ids, BTreeSet::from([1, 5]));
    }

    #[test]
    fn shift_click_behaves_like_plain_click() {
        let action = UnitSelectionAction::UnitClicked {
            unit_id: 2,
            ctrl_key: false,
            shift_key: true,
        };
        let next = reduce_sorting(&selected(&[1]), action.into(), 0);
        assert_eq!(next.selected_unit_ids, BTreeSet::from([2]));
    }

    #[test]
    fn clicking_the_sole_selection_keeps_identity() {
        let state = selected(&[4]);
        assert!(Arc::ptr_eq(&state, &reduce_sorting(&state, click(4, false), 0)));
    }

    #[test]
    fn visible_units_null_means_all() {
        let state = Arc::new(SortingSelection::default());
        assert!(state.visible_unit_ids.contains(99));

        let action: SortingSelectionAction = serde_json::from_value(json!({
            "type": "SetVisibleUnitIds",
            "visibleUnitIds": [1, 2]
        }))
        .unwrap();
        let next = reduce_sorting(&state, action, 0);
        assert!(next.visible_unit_ids.contains(2));
        assert!(!next.visible_unit_ids.contains(3));

        let action: SortingSelectionAction = serde_json::from_value(json!({
            "type": "SetVisibleUnitIds",
            "visibleUnitIds": null
        }))
        .unwrap();
        let next = reduce_sorting(&next, action, 0);
        assert_eq!(next.visible_unit_ids, VisibleUnits::All);
    }

    #[test]
    fn recording_actions_apply_to_embedded_selection() {
        let state = Arc::new(SortingSelection {
            recording: RecordingSelection {
                current_timepoint: Some(100),
                ..Default::default()
            },
            ..Default::default()
        });
        let state = reduce_sorting(
            &state,
            RecordingSelectionAction::SetCurrentTimepointVelocity { velocity: 10.0 }.into(),
            1_000,
        );
        let state = reduce_sorting(&state, RecordingSelectionAction::AnimateRecording.into(), 1_500);
        assert_eq!(state.recording.current_timepoint, Some(105));

        let same = reduce_sorting(&state, RecordingSelectionAction::AnimateRecording.into(), 1_500);
        assert!(Arc::ptr_eq(&state, &same));
    }

    #[test]
    fn actions_share_one_flat_namespace() {
        let parse = |value| serde_json::from_value::<SortingSelectionAction>(value).unwrap();

        assert_eq!(
            parse(json!({"type": "UnitClicked", "unitId": 4, "ctrlKey": true})),
            SortingSelectionAction::Unit(UnitSelectionAction::UnitClicked {
                unit_id: 4,
                ctrl_key: true,
                shift_key: false,
            })
        );
        assert_eq!(
            parse(json!({"type": "SetSelectedUnitIds", "selectedUnitIds": [2, 1]})),
            SortingSelectionAction::Unit(UnitSelectionAction::SetSelectedUnitIds {
                selected_unit_ids: BTreeSet::from([1, 2]),
            })
        );
        assert_eq!(
            parse(json!({"type": "SetCurrentTimepoint", "currentTimepoint": 5})),
            SortingSelectionAction::Recording(RecordingSelectionAction::SetCurrentTimepoint {
                current_timepoint: Some(5),
            })
        );
        assert_eq!(
            parse(json!({"type": "SetCurrentTimepointVelocity", "velocity": 10.0})),
            SortingSelectionAction::Recording(RecordingSelectionAction::SetCurrentTimepointVelocity {
                velocity: 10.0
            })
        );

        assert_eq!(
            serde_json::to_value(click(9, false)).unwrap(),
            json!({"type": "UnitClicked", "unitId": 9, "ctrlKey": false, "shiftKey": false})
        );
        let animate: SortingSelectionAction = RecordingSelectionAction::AnimateRecording.into();
        assert_eq!(
            serde_json::to_value(animate).unwrap(),
            json!({"type": "AnimateRecording"})
        );
    }

    #[test]
    fn unknown_action_is_a_no_op() {
        let action: SortingSelectionAction =
            serde_json::from_value(json!({"type": "ShiftRangeSelect", "unitId": 3})).unwrap();
        assert_eq!(action, SortingSelectionAction::Recording(RecordingSelectionAction::Unknown));

        let state = selected(&[1, 2]);
        assert!(Arc::ptr_eq(&state, &reduce_sorting(&state, action, 0)));
    }

    #[test]
    fn selection_serializes_flat() {
        let selection = SortingSelection {
            recording: RecordingSelection {
                current_timepoint: Some(3),
                ..Default::default()
            },
            selected_unit_ids: BTreeSet::from([1]),
            visible_unit_ids: VisibleUnits::All,
        };
        let value = serde_json::to_value(&selection).unwrap();
        assert_eq!(value["currentTimepoint"], json!(3));
        assert_eq!(value["selectedUnitIds"], json!([1]));
        assert_eq!(value["visibleUnitIds"], json!(null));

        let back: SortingSelection = serde_json::from_value(value).unwrap();
        assert_eq!(back, selection);
    }
}
