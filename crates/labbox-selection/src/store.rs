//! Observable selection store.
//!
//! Holds the current selection behind a `watch` channel. Dispatching an
//! action that leaves the selection unchanged does not notify subscribers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::recording::{reduce_recording, Animation, RecordingSelection, RecordingSelectionAction};
use crate::sorting::{reduce_sorting, SortingSelection, SortingSelectionAction};

/// A selection state with a pure reducer.
pub trait Selection: PartialEq + Send + Sync + 'static {
    type Action: Send + 'static;

    /// Reduce; must return `state` itself when nothing changed.
    fn reduce(state: &Arc<Self>, action: Self::Action, now_ms: u64) -> Arc<Self>;

    /// The animation in progress, if any.
    fn animation(&self) -> Option<&Animation>;

    /// The action that advances the animation.
    fn animate_action() -> Self::Action;
}

impl Selection for RecordingSelection {
    type Action = RecordingSelectionAction;

    fn reduce(state: &Arc<Self>, action: Self::Action, now_ms: u64) -> Arc<Self> {
        reduce_recording(state, action, now_ms)
    }

    fn animation(&self) -> Option<&Animation> {
        self.animation.as_ref()
    }

    fn animate_action() -> Self::Action {
        RecordingSelectionAction::AnimateRecording
    }
}

impl Selection for SortingSelection {
    type Action = SortingSelectionAction;

    fn reduce(state: &Arc<Self>, action: Self::Action, now_ms: u64) -> Arc<Self> {
        reduce_sorting(state, action, now_ms)
    }

    fn animation(&self) -> Option<&Animation> {
        self.recording.animation.as_ref()
    }

    fn animate_action() -> Self::Action {
        RecordingSelectionAction::AnimateRecording.into()
    }
}

struct StoreInner<S> {
    state: watch::Sender<Arc<S>>,
    clock: Arc<dyn Clock>,
}

/// Shared handle to a selection. Clones observe the same state.
pub struct SelectionStore<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for SelectionStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Selection> SelectionStore<S> {
    /// Store driven by the system clock.
    pub fn new(initial: S) -> Self {
        Self::with_clock(initial, Arc::new(SystemClock))
    }

    pub fn with_clock(initial: S, clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(Arc::new(initial));
        Self {
            inner: Arc::new(StoreInner { state, clock }),
        }
    }

    /// Current selection.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.inner.state.borrow())
    }

    /// Apply an action. Returns whether the selection changed.
    pub fn dispatch(&self, action: S::Action) -> bool {
        let now_ms = self.inner.clock.now_ms();
        self.inner.state.send_if_modified(|current| {
            let next = S::reduce(current, action, now_ms);
            if Arc::ptr_eq(&next, current) {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.inner.state.subscribe()
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }
}
