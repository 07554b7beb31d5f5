// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Monitor, Timeout};

/// A handle that can be waited on with a timeout.
pub trait WaitHandle: Send + Sync {
    /// Blocks until the handle is signaled or the timeout expires.
    ///
    /// Returns `true` when signaled, `false` on timeout.
    fn wait_one(&self, timeout: Timeout) -> bool;
}

/// A handle that can be signaled from another thread.
pub trait Signal: Send + Sync {
    /// Signals the handle, releasing at least one waiter.
    fn signal(&self);
}

/// An event that releases a single waiter per signal.
///
/// Setting the event while no thread is waiting leaves it signaled; the next
/// wait consumes the signal and resets the event. Multiple sets without an
/// intervening wait coalesce into one.
///
/// # Examples
///
/// ```
/// use sched_primitives::{AutoResetEvent, Timeout, WaitHandle};
///
/// let event = AutoResetEvent::new(false);
/// event.set();
///
/// assert!(event.wait_one(Timeout::from_millis(0)));
/// // The first wait consumed the signal.
/// assert!(!event.wait_one(Timeout::from_millis(0)));
/// ```
#[derive(Debug)]
pub struct AutoResetEvent {
    signaled: Monitor<bool>,
}

impl AutoResetEvent {
    /// Creates the event, optionally already signaled.
    #[must_use]
    pub const fn new(initially_signaled: bool) -> Self {
        Self {
            signaled: Monitor::new(initially_signaled),
        }
    }

    /// Signals the event, releasing one waiter.
    pub fn set(&self) {
        let mut guard = self.signaled.enter();
        *guard = true;
        guard.pulse();
    }
}

impl WaitHandle for AutoResetEvent {
    fn wait_one(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut guard = self.signaled.enter();
        loop {
            if *guard {
                *guard = false;
                return true;
            }
            match deadline {
                None => guard.wait(),
                Some(deadline) => {
                    if !guard.wait_until(deadline) {
                        // Timed out; the signal may still have arrived while
                        // we were re-acquiring the monitor.
                        let signaled = *guard;
                        *guard = false;
                        return signaled;
                    }
                }
            }
        }
    }
}

impl Signal for AutoResetEvent {
    fn signal(&self) {
        self.set();
    }
}

/// An event that releases every waiter once set, until explicitly reset.
#[derive(Debug)]
pub struct ManualResetEvent {
    signaled: Monitor<bool>,
}

impl ManualResetEvent {
    /// Creates the event, optionally already signaled.
    #[must_use]
    pub const fn new(initially_signaled: bool) -> Self {
        Self {
            signaled: Monitor::new(initially_signaled),
        }
    }

    /// Signals the event, releasing all current and future waiters.
    pub fn set(&self) {
        let mut guard = self.signaled.enter();
        *guard = true;
        guard.pulse_all();
    }

    /// Returns the event to the unsignaled state.
    pub fn reset(&self) {
        *self.signaled.enter() = false;
    }

    /// Whether the event is currently signaled.
    #[must_use]
    pub fn is_set(&self) -> bool {
        *self.signaled.enter()
    }
}

impl WaitHandle for ManualResetEvent {
    fn wait_one(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut guard = self.signaled.enter();
        loop {
            if *guard {
                return true;
            }
            match deadline {
                None => guard.wait(),
                Some(deadline) => {
                    if !guard.wait_until(deadline) {
                        return *guard;
                    }
                }
            }
        }
    }
}

impl Signal for ManualResetEvent {
    fn signal(&self) {
        self.set();
    }
}
