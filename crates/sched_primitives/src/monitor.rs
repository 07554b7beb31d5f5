// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::Timeout;

/// Mutual exclusion with condition wait/pulse over a piece of state.
///
/// A `Monitor` pairs one mutex with one condition variable, the shape every
/// blocking structure in the coordination layer is built from: enter the
/// monitor, inspect the guarded state, and either act or wait to be pulsed.
///
/// Waits release the monitor while parked and re-acquire it before
/// returning. Spurious wakeups are possible; callers re-check their
/// condition in a loop, recomputing any remaining timeout from an absolute
/// deadline via [`MonitorGuard::wait_until`].
///
/// # Examples
///
/// ```
/// use sched_primitives::Monitor;
///
/// let pending = Monitor::new(Vec::new());
///
/// {
///     let mut guard = pending.enter();
///     guard.push(42);
///     guard.pulse();
/// }
///
/// assert_eq!(pending.enter().len(), 1);
/// ```
pub struct Monitor<T> {
    state: Mutex<T>,
    waiters: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a monitor guarding `state`.
    pub const fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            waiters: Condvar::new(),
        }
    }

    /// Enters the monitor, blocking until it is available.
    pub fn enter(&self) -> MonitorGuard<'_, T> {
        MonitorGuard {
            state: self.state.lock(),
            waiters: &self.waiters,
        }
    }
}

impl<T> fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Monitor { .. }")
    }
}

/// Exclusive access to a [`Monitor`]'s state, with wait/pulse operations.
pub struct MonitorGuard<'a, T> {
    state: MutexGuard<'a, T>,
    waiters: &'a Condvar,
}

impl<T> MonitorGuard<'_, T> {
    /// Releases the monitor and parks until pulsed.
    pub fn wait(&mut self) {
        self.waiters.wait(&mut self.state);
    }

    /// Releases the monitor and parks until pulsed or the deadline passes.
    ///
    /// Returns `false` when the wait timed out. A deadline already in the
    /// past returns `false` without parking.
    pub fn wait_until(&mut self, deadline: Instant) -> bool {
        !self.waiters.wait_until(&mut self.state, deadline).timed_out()
    }

    /// Releases the monitor and parks for at most `timeout`.
    ///
    /// Returns `false` when the wait timed out; an infinite timeout always
    /// returns `true`.
    pub fn wait_for(&mut self, timeout: Timeout) -> bool {
        match timeout.deadline() {
            None => {
                self.wait();
                true
            }
            Some(deadline) => self.wait_until(deadline),
        }
    }

    /// Wakes a single waiter parked on this monitor.
    ///
    /// The woken waiter re-checks its condition and may re-block; waking one
    /// thread at a time trades a possible chain of wakeups for never paying
    /// a thundering herd.
    pub fn pulse(&self) {
        self.waiters.notify_one();
    }

    /// Wakes every waiter parked on this monitor.
    pub fn pulse_all(&self) {
        self.waiters.notify_all();
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> fmt::Debug for MonitorGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("MonitorGuard { .. }")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Monitor<u32>: Send, Sync);
    }

    #[test]
    fn enter_gives_exclusive_access() {
        let monitor = Monitor::new(0_u32);
        *monitor.enter() += 1;
        assert_eq!(*monitor.enter(), 1);
    }

    #[test]
    fn wait_until_past_deadline_times_out() {
        let monitor = Monitor::new(());
        let mut guard = monitor.enter();
        assert!(!guard.wait_until(Instant::now()));
    }

    #[test]
    fn wait_for_finite_timeout_expires() {
        let monitor = Monitor::new(());
        let started = Instant::now();
        let mut guard = monitor.enter();
        assert!(!guard.wait_for(Timeout::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pulse_wakes_a_waiter() {
        let monitor = Arc::new(Monitor::new(false));
        let monitor_clone = Arc::clone(&monitor);

        let waiter = std::thread::spawn(move || {
            let mut guard = monitor_clone.enter();
            while !*guard {
                guard.wait();
            }
        });

        {
            let mut guard = monitor.enter();
            *guard = true;
            guard.pulse();
        }

        waiter.join().unwrap();
    }
}
