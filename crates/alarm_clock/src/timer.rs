// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sched_primitives::Signal;

use crate::{Alarm, Error, Result, TimerContext, INFINITE};

/// The callback a [`Timer`] invokes on the driver thread.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// A timer that invokes a callback after a due time, then optionally every
/// period.
///
/// Durations are in milliseconds; `-1` means "infinite" (a due time of `-1`
/// leaves the timer dormant, a period of `-1` or `0` makes it one-shot). The
/// callback runs on the shared driver thread, so it must not block for long.
///
/// Disposal is idempotent and deferred-acknowledged: [`Timer::dispose_notify`]
/// signals the given handle only once the driver has passed a point where the
/// callback can no longer start.
pub struct Timer {
    inner: Arc<TimerInner>,
    alarm: Alarm,
}

struct TimerInner {
    context: Arc<TimerContext>,
    state: Mutex<TimerState>,
}

struct TimerState {
    disposed: bool,
    callback: TimerCallback,
}

impl Timer {
    /// Creates a timer on the process-wide driver and schedules it.
    ///
    /// # Errors
    ///
    /// Fails if `due_time` or `period` is below `-1`.
    pub fn new(callback: TimerCallback, due_time: i64, period: i64) -> Result<Self> {
        Self::with_context(Arc::clone(TimerContext::global()), callback, due_time, period)
    }

    /// Creates a timer on an explicit context, for hosts and tests that
    /// drive time themselves.
    ///
    /// # Errors
    ///
    /// Fails if `due_time` or `period` is below `-1`.
    pub fn with_context(
        context: Arc<TimerContext>,
        callback: TimerCallback,
        due_time: i64,
        period: i64,
    ) -> Result<Self> {
        let inner = Arc::new(TimerInner {
            context: Arc::clone(&context),
            state: Mutex::new(TimerState {
                disposed: false,
                callback,
            }),
        });

        let fire = Arc::clone(&inner);
        let alarm = context.clock().create_alarm(move || fire.fire());

        let timer = Self { inner, alarm };
        timer.change(due_time, period)?;
        Ok(timer)
    }

    /// Reschedules the timer, replacing any previous schedule.
    ///
    /// Returns `false` if the timer is already disposed (after validating the
    /// arguments), `true` otherwise.
    ///
    /// # Errors
    ///
    /// Fails if `due_time` or `period` is below `-1`, before the disposed
    /// state is consulted.
    pub fn change(&self, due_time: i64, period: i64) -> Result<bool> {
        if due_time < -1 {
            return Err(Error::non_neg_or_neg_one("due_time"));
        }
        if period < -1 {
            return Err(Error::non_neg_or_neg_one("period"));
        }
        if self.inner.state.lock().disposed {
            return Ok(false);
        }

        let due_time = if due_time == -1 { INFINITE } else { due_time };
        let period = if period <= 0 { INFINITE } else { period };

        // Bring the clock up to date before scheduling against it, so the
        // due time is measured from now rather than from the driver's last
        // park.
        self.inner.context.sync_to_wall(period);
        self.alarm.set(due_time, period)?;
        self.inner.context.wake_driver();
        Ok(true)
    }

    /// Disposes the timer. Returns `false` if it was already disposed.
    ///
    /// The callback may still be in flight on the driver thread when this
    /// returns; use [`Timer::dispose_notify`] to find out when it cannot run
    /// anymore.
    pub fn dispose(&self) -> bool {
        self.dispose_internal()
    }

    /// Disposes the timer, signaling `done` once the driver has acknowledged
    /// the disposal and the callback can no longer start.
    ///
    /// Returns `false` (without queuing the signal) if the timer was already
    /// disposed.
    pub fn dispose_notify(&self, done: Arc<dyn Signal>) -> bool {
        if !self.dispose_internal() {
            return false;
        }
        self.inner.context.enqueue_disposed(done);
        true
    }

    fn dispose_internal(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return false;
            }
            state.disposed = true;
        }
        self.alarm.cancel();
        true
    }
}

impl TimerInner {
    fn fire(&self) {
        // Deliberately no disposed check: a firing already dispatched by the
        // clock races with disposal, and that race is allowed. Snapshot the
        // callback so the state lock is not held while it runs.
        let callback = Arc::clone(&self.state.lock().callback);
        callback();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.dispose_internal();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("disposed", &self.inner.state.lock().disposed)
            .finish()
    }
}
