//! Increment scheduling and the engine lifecycle state machine.
//!
//! The scheduler decides when the next increment runs and carries the
//! shared state the control surface observes:
//!
//! ```text
//! Idle -> AwaitingTrigger -> Running -> Committing -> AwaitingTrigger -> ...
//!                                    \-> Failed
//! Stopped is terminal and reachable from any state on explicit stop.
//! ```
//!
//! Stop requests are cooperative: the in-flight increment always finishes
//! its commit first. A stop never truncates a checkpoint write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::TriggerMode;
use crate::error::{EngineError, Result, Termination};

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    AwaitingTrigger,
    Running,
    Committing,
    Failed,
    Stopped,
}

impl SchedulerState {
    /// True while an increment is executing or committing; a stop request
    /// must wait these out.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SchedulerState::Running | SchedulerState::Committing)
    }

    /// True once no further increments will run.
    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Stopped | SchedulerState::Failed)
    }
}

struct SchedulerShared {
    state: Mutex<SchedulerState>,
    state_changed: Condvar,
    stop_requested: AtomicBool,
}

/// Decides when the next increment runs and exposes the lifecycle state.
///
/// Cloneable handle: the engine thread drives transitions, control threads
/// observe them through `request_stop` / `await_termination`.
#[derive(Clone)]
pub struct TriggerScheduler {
    mode: TriggerMode,
    shared: Arc<SchedulerShared>,
}

impl TriggerScheduler {
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            shared: Arc::new(SchedulerShared {
                state: Mutex::new(SchedulerState::Idle),
                state_changed: Condvar::new(),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock().expect("scheduler state poisoned")
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    /// Move to `next` and wake everyone waiting on a transition.
    pub fn transition(&self, next: SchedulerState) {
        let mut state = self.shared.state.lock().expect("scheduler state poisoned");
        if *state == next {
            return;
        }
        tracing::debug!("scheduler state {:?} -> {:?}", *state, next);
        *state = next;
        self.shared.state_changed.notify_all();
    }

    /// Sleep until the next increment is due, or return early on stop.
    ///
    /// For fixed-interval mode the next increment is due at
    /// `last_started + interval`, or immediately if the previous increment
    /// overran the interval — increments never overlap because a single
    /// engine thread drives them. `Once` and `Continuous` are always due.
    ///
    /// Returns false when a stop was requested and the engine should halt
    /// instead of running another increment.
    pub fn wait_for_trigger(&self, last_started: Option<Instant>) -> bool {
        if self.stop_requested() {
            return false;
        }
        let deadline = match (self.mode, last_started) {
            (TriggerMode::FixedInterval(interval), Some(started)) => started + interval,
            _ => return true,
        };

        // Sleep in short slices so a stop request interrupts the wait.
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            if self.stop_requested() {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            std::thread::sleep(slice);
        }
    }

    /// Signal the engine to stop after the in-flight increment commits.
    ///
    /// Blocks until the increment has left `Running`/`Committing`, up to
    /// `timeout`. On timeout the stop flag stays set — the engine will
    /// still stop once the commit completes — but the caller is told the
    /// commit did not finish in time. The commit itself is never aborted.
    pub fn request_stop(&self, timeout: Duration) -> Result<()> {
        self.shared.stop_requested.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().expect("scheduler state poisoned");
        while state.is_in_flight() {
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::StopTimeout(timeout));
            }
            let (guard, _) = self
                .shared
                .state_changed
                .wait_timeout(state, deadline - now)
                .expect("scheduler state poisoned");
            state = guard;
        }
        Ok(())
    }

    /// Wait until the engine reaches a terminal state.
    pub fn await_termination(&self, timeout: Duration) -> Termination {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().expect("scheduler state poisoned");
        while !state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Termination::TimedOut;
            }
            let (guard, _) = self
                .shared
                .state_changed
                .wait_timeout(state, deadline - now)
                .expect("scheduler state poisoned");
            state = guard;
        }
        Termination::Completed
    }
}
