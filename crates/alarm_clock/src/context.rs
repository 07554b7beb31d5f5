// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sched_primitives::{AutoResetEvent, Signal, Spawner, Timeout, WaitHandle};

use crate::{AlarmClock, Error, Result};

/// The state shared by every [`Timer`](crate::Timer): a single [`AlarmClock`]
/// plus the driver that advances it.
///
/// In production there is exactly one context per process, lazily created by
/// [`TimerContext::global`] together with its background driver thread. The
/// driver parks until the next alarm is due (or until woken early by a timer
/// change or disposal), measures the wall time that actually elapsed, and
/// advances the clock by that amount.
///
/// Tests use [`TimerContext::new_manual`] instead: no thread is started and
/// no wall time is consulted, so a test advances virtual time explicitly with
/// [`TimerContext::advance`] and observes deterministic firings.
pub struct TimerContext {
    clock: AlarmClock,

    /// Wakes the driver early after a timer change or disposal.
    wakeup: AutoResetEvent,

    /// Handles to signal once the clock is quiescent after a disposal. The
    /// driver (or a manual advance) drains this before advancing time, so a
    /// signaled handle guarantees the disposed timer's alarm can no longer
    /// fire.
    dispose_queue: Mutex<VecDeque<Arc<dyn Signal>>>,

    /// Present only when a driver thread paces this context from wall time.
    wall: Option<WallAnchor>,
}

struct WallAnchor {
    last_ms: Mutex<i64>,
}

static GLOBAL: Lazy<Arc<TimerContext>> = Lazy::new(|| {
    TimerContext::with_spawner(&Spawner::new_os())
        .expect("the process-wide timer driver thread must be startable")
});

impl TimerContext {
    /// The process-wide context, creating it and its driver thread on first
    /// use.
    ///
    /// The context lives for the remainder of the process; there is no
    /// teardown path.
    ///
    /// # Panics
    ///
    /// Panics on first use if the driver thread cannot be started.
    #[must_use]
    pub fn global() -> &'static Arc<Self> {
        &GLOBAL
    }

    /// Creates a context driven by a thread obtained from `spawner`.
    ///
    /// # Errors
    ///
    /// Fails if `spawner` cannot create the driver thread.
    pub fn with_spawner(spawner: &Spawner) -> Result<Arc<Self>> {
        let context = Arc::new(Self {
            clock: AlarmClock::new(),
            wakeup: AutoResetEvent::new(false),
            dispose_queue: Mutex::new(VecDeque::new()),
            wall: Some(WallAnchor {
                last_ms: Mutex::new(wall_now_ms()),
            }),
        });

        let driver = Arc::clone(&context);
        spawner
            .spawn("timer-driver", move || driver.run_driver())
            .map_err(Error::driver)?;
        Ok(context)
    }

    /// Creates a context without a driver thread.
    ///
    /// Virtual time only moves when [`TimerContext::advance`] is called.
    #[must_use]
    pub fn new_manual() -> Arc<Self> {
        Arc::new(Self {
            clock: AlarmClock::new(),
            wakeup: AutoResetEvent::new(false),
            dispose_queue: Mutex::new(VecDeque::new()),
            wall: None,
        })
    }

    /// The clock this context drives.
    #[must_use]
    pub fn clock(&self) -> &AlarmClock {
        &self.clock
    }

    /// Advances virtual time by `ticks`, acknowledging pending disposals
    /// first and firing every alarm that expires in the covered interval.
    pub fn advance(&self, ticks: i64) {
        self.drain_dispose_queue();
        self.clock.sleep(ticks.max(0));
    }

    /// Queues `done` to be signaled once the clock is quiescent, and wakes
    /// the driver so that happens promptly.
    pub(crate) fn enqueue_disposed(&self, done: Arc<dyn Signal>) {
        self.dispose_queue.lock().push_back(done);
        self.wakeup.set();
    }

    /// Wakes the driver so it re-reads the time until the next alarm.
    pub(crate) fn wake_driver(&self) {
        self.wakeup.set();
    }

    fn drain_dispose_queue(&self) {
        loop {
            // Signal outside the lock; a waiter woken by the signal may
            // dispose another timer and re-enter the queue.
            let Some(done) = self.dispose_queue.lock().pop_front() else {
                return;
            };
            done.signal();
        }
    }

    /// Advances the clock by the wall time elapsed since the last
    /// synchronization, clamped against suspend/hibernate jumps.
    ///
    /// `nominal` is the delay the caller nominally waited or scheduled; an
    /// elapsed time wildly larger than it is treated as a clock jump and
    /// discarded rather than replayed as a burst of firings.
    pub(crate) fn sync_to_wall(&self, nominal: i64) {
        let Some(wall) = &self.wall else {
            return;
        };
        let now = wall_now_ms();
        let elapsed = {
            let mut last = wall.last_ms.lock();
            let elapsed = now.saturating_sub(*last);
            *last = now;
            elapsed
        };
        self.clock.sleep(clamped_elapsed(elapsed, nominal));
    }

    #[cfg_attr(test, mutants::skip)] // endless loop
    fn run_driver(self: Arc<Self>) {
        loop {
            self.drain_dispose_queue();

            let till = self.clock.time_till_alarm();
            let wait = Timeout::from_millis(till.min(i64::from(i32::MAX)).unsigned_abs());
            tracing::trace!(till_next_alarm_ms = till, "timer driver parking");
            let _ = self.wakeup.wait_one(wait);

            self.sync_to_wall(till);
        }
    }
}

impl fmt::Debug for TimerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerContext")
            .field("clock", &self.clock)
            .field("driven", &self.wall.is_some())
            .finish()
    }
}

fn wall_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| i64::try_from(since.as_millis()).unwrap_or(i64::MAX))
}

/// Clamps a measured wall-time delta before it is replayed on the clock.
///
/// Negative deltas (the wall clock went backwards) and deltas more than ten
/// times the nominal wait (the machine slept or the clock jumped forwards)
/// are discarded.
fn clamped_elapsed(elapsed: i64, nominal: i64) -> i64 {
    if elapsed < 0 {
        return 0;
    }
    if nominal > 0 && elapsed > nominal.saturating_mul(10) {
        return 0;
    }
    elapsed
}
