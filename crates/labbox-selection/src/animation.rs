//! Background driver for timepoint animation.
//!
//! Ticks at a fixed interval and dispatches the animate action while the
//! selection has a nonzero velocity. Positions come from the store clock,
//! so late or skipped ticks only affect smoothness.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::store::{Selection, SelectionStore};

/// Default tick period.
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Handle to a running animation loop. Dropping it aborts the loop.
pub struct AnimationDriver {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl AnimationDriver {
    /// Start animating `store`. Must be called within a tokio runtime.
    pub fn spawn<S: Selection>(store: SelectionStore<S>, tick: Duration) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);
        let tick = tick.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(tick_ms = tick.as_millis() as u64, "Animation driver started");

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        let moving = store.state().animation().is_some_and(|a| a.is_moving());
                        if moving {
                            store.dispatch(S::animate_action());
                        }
                    }
                }
            }

            debug!("Animation driver stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AnimationDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
