//! Recording selection state and its reducer.
//!
//! The timepoint animation is driven by wall-clock time: each
//! [`RecordingSelectionAction::AnimateRecording`] advances the current
//! timepoint by `velocity * elapsed` since the last stamp, so tick jitter
//! never changes where the cursor ends up.
//!
//! A single advance lands on `round(timepoint + velocity * elapsed / 1000)`,
//! rounding halves toward positive infinity. Over a run of ticks the
//! sub-timepoint remainder of each advance is carried forward in
//! [`Animation::timepoint_carry`] rather than discarded, so the position
//! after many short ticks matches one long advance over the same span
//! instead of matching the sum of per-tick roundings.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// A sample index into the recording.
pub type Timepoint = i64;

/// Electrode (channel) identifier.
pub type ElectrodeId = u64;

/// Visible time window, in timepoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: Timepoint,
    pub max: Timepoint,
}

impl TimeRange {
    pub fn new(min: Timepoint, max: Timepoint) -> Self {
        Self { min, max }
    }

    pub fn len(&self) -> Timepoint {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.max <= self.min
    }
}

/// Timepoint animation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    /// Wall-clock milliseconds of the last advance (or velocity change).
    pub last_update_timestamp: u64,
    /// Timepoints per second. Zero means paused.
    pub current_timepoint_velocity: f64,
    /// Fraction of a timepoint not yet applied to the current timepoint.
    #[serde(default)]
    pub timepoint_carry: f64,
}

impl Animation {
    fn started_at(now_ms: u64, velocity: f64) -> Self {
        Self {
            last_update_timestamp: now_ms,
            current_timepoint_velocity: velocity,
            timepoint_carry: 0.0,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.current_timepoint_velocity != 0.0
    }
}

fn default_amp_scale_factor() -> f64 {
    1.0
}

/// What the user is looking at within a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSelection {
    #[serde(default)]
    pub selected_electrode_ids: BTreeSet<ElectrodeId>,
    #[serde(default)]
    pub current_timepoint: Option<Timepoint>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default = "default_amp_scale_factor")]
    pub amp_scale_factor: f64,
    #[serde(default)]
    pub animation: Option<Animation>,
}

impl Default for RecordingSelection {
    fn default() -> Self {
        Self {
            selected_electrode_ids: BTreeSet::new(),
            current_timepoint: None,
            time_range: None,
            amp_scale_factor: default_amp_scale_factor(),
            animation: None,
        }
    }
}

impl RecordingSelection {
    /// Current velocity in timepoints per second, zero when not animating.
    pub fn velocity(&self) -> f64 {
        self.animation
            .map_or(0.0, |animation| animation.current_timepoint_velocity)
    }
}

/// Mutations of a [`RecordingSelection`], tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum RecordingSelectionAction {
    SetRecordingSelection {
        recording_selection: RecordingSelection,
    },
    SetSelectedElectrodeIds {
        selected_electrode_ids: BTreeSet<ElectrodeId>,
    },
    SetCurrentTimepoint {
        current_timepoint: Option<Timepoint>,
    },
    SetTimeRange {
        time_range: Option<TimeRange>,
    },
    SetAmpScaleFactor {
        amp_scale_factor: f64,
    },
    ScaleAmpScaleFactor {
        multiplier: f64,
    },
    /// Timepoints per second; stamps the animation time origin.
    SetCurrentTimepointVelocity {
        velocity: f64,
    },
    AnimateRecording,
    /// An action type this build does not know. Applying it changes nothing.
    #[serde(other)]
    Unknown,
}

/// Apply `action` at wall-clock time `now_ms`.
///
/// Returns `state` itself (same allocation) when nothing changed.
pub fn reduce_recording(
    state: &Arc<RecordingSelection>,
    action: RecordingSelectionAction,
    now_ms: u64,
) -> Arc<RecordingSelection> {
    match apply(state, action, now_ms) {
        Some(next) if next != **state => Arc::new(next),
        _ => Arc::clone(state),
    }
}

/// The new selection, or `None` when the action is a no-op.
pub(crate) fn apply(
    state: &RecordingSelection,
    action: RecordingSelectionAction,
    now_ms: u64,
) -> Option<RecordingSelection> {
    use RecordingSelectionAction::*;

    let mut next = state.clone();
    match action {
        SetRecordingSelection {
            recording_selection,
        } => next = recording_selection,
        SetSelectedElectrodeIds {
            selected_electrode_ids,
        } => next.selected_electrode_ids = selected_electrode_ids,
        SetCurrentTimepoint { current_timepoint } => {
            next.current_timepoint = current_timepoint;
            if let Some(animation) = next.animation.as_mut() {
                animation.timepoint_carry = 0.0;
            }
        }
        SetTimeRange { time_range } => next.time_range = time_range,
        SetAmpScaleFactor { amp_scale_factor } => {
            if !valid_amp_factor(amp_scale_factor) {
                trace!(amp_scale_factor, "Ignoring invalid amplitude scale factor");
                return None;
            }
            next.amp_scale_factor = amp_scale_factor;
        }
        ScaleAmpScaleFactor { multiplier } => {
            let factor = state.amp_scale_factor * multiplier;
            if !valid_amp_factor(factor) {
                trace!(multiplier, "Ignoring invalid amplitude multiplier");
                return None;
            }
            next.amp_scale_factor = factor;
        }
        SetCurrentTimepointVelocity { velocity } => {
            if !velocity.is_finite() {
                return None;
            }
            next.animation = Some(Animation::started_at(now_ms, velocity));
        }
        AnimateRecording => return animate(state, now_ms),
        Unknown => {
            trace!("Ignoring unknown recording selection action");
            return None;
        }
    }
    Some(next)
}

fn valid_amp_factor(factor: f64) -> bool {
    factor.is_finite() && factor > 0.0
}

fn animate(state: &RecordingSelection, now_ms: u64) -> Option<RecordingSelection> {
    let animation = state.animation?;
    let timepoint = state.current_timepoint?;
    if !animation.is_moving() {
        return None;
    }

    let elapsed_ms = now_ms.saturating_sub(animation.last_update_timestamp);
    if elapsed_ms == 0 {
        return None;
    }

    let exact = timepoint as f64
        + animation.timepoint_carry
        + animation.current_timepoint_velocity * (elapsed_ms as f64 / 1000.0);
    let advanced = round_half_up(exact);

    let mut next = state.clone();
    next.current_timepoint = Some(advanced as Timepoint);
    next.animation = Some(Animation {
        last_update_timestamp: now_ms,
        current_timepoint_velocity: animation.current_timepoint_velocity,
        timepoint_carry: exact - advanced,
    });
    Some(next)
}

/// Nearest integer, halves toward positive infinity.
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}
