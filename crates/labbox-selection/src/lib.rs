//! labbox-selection - Recording and Sorting Selection State
//!
//! Pure reducers over immutable selection snapshots:
//!
//! - [`RecordingSelection`]: selected electrodes, current timepoint, time
//!   range, amplitude scale and timepoint animation.
//! - [`SortingSelection`]: the above plus selected and visible units.
//!
//! Reducers return the same `Arc` when an action changes nothing, so
//! observers can skip work by pointer comparison. [`SelectionStore`] wraps
//! a selection in a watch channel and [`AnimationDriver`] advances the
//! timepoint in the background.

pub mod animation;
pub mod clock;
pub mod recording;
pub mod sorting;
pub mod store;

pub use animation::{AnimationDriver, DEFAULT_TICK};
pub use clock::{Clock, ManualClock, SystemClock};
pub use recording::{
    reduce_recording, Animation, ElectrodeId, RecordingSelection, RecordingSelectionAction,
    TimeRange, Timepoint,
};
pub use sorting::{
    reduce_sorting, SortingSelection, SortingSelectionAction, UnitSelectionAction, VisibleUnits,
};
pub use store::{Selection, SelectionStore};
