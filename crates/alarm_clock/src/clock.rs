// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Disables an alarm, or marks it one-shot when used as a period.
pub const INFINITE: i64 = i64::MAX;

/// Orders the pending set by expiry time.
///
/// The sequence number makes alarms armed for the same expiry fire in the
/// order they were armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AlarmKey {
    expiry: i64,
    seq: u64,
}

/// A clock that fires alarms as its virtual time is advanced.
///
/// An `AlarmClock` keeps track of time without advancing it. Create alarms
/// with [`AlarmClock::create_alarm`] and arm them with [`Alarm::set`]; the
/// owner of the clock advances time explicitly with [`AlarmClock::sleep`],
/// which fires every alarm expiring in the covered interval.
/// [`AlarmClock::time_till_alarm`] tells a driver how long it may park
/// before the next alarm is due.
///
/// Time units are whatever the caller makes them, as long as the same unit
/// is used for [`Alarm::set`] and [`AlarmClock::sleep`]. Manipulating `N`
/// pending alarms costs `O(log N)`.
///
/// Cloning is cheap and clones share the same pending set.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use alarm_clock::{AlarmClock, INFINITE};
///
/// let clock = AlarmClock::new();
/// let fired = Arc::new(AtomicUsize::new(0));
///
/// let fired_clone = Arc::clone(&fired);
/// let alarm = clock.create_alarm(move || {
///     fired_clone.fetch_add(1, Ordering::SeqCst);
/// });
///
/// alarm.set(10, INFINITE)?; // one-shot, due in 10 units
/// assert_eq!(clock.time_till_alarm(), 10);
///
/// clock.sleep(10);
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// assert_eq!(clock.time_till_alarm(), INFINITE);
///
/// # Ok::<(), alarm_clock::Error>(())
/// ```
#[derive(Clone)]
pub struct AlarmClock {
    shared: Arc<ClockShared>,
}

struct ClockShared {
    state: Mutex<ClockState>,
}

struct ClockState {
    now: i64,
    next_seq: u64,
    pending: BTreeMap<AlarmKey, Arc<AlarmShared>>,
}

impl AlarmClock {
    /// Creates a clock with virtual time zero and no pending alarms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ClockShared {
                state: Mutex::new(ClockState {
                    now: 0,
                    next_seq: 0,
                    pending: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Creates a new, initially disabled [`Alarm`] firing `handler`.
    pub fn create_alarm(&self, handler: impl Fn() + Send + Sync + 'static) -> Alarm {
        Alarm {
            shared: Arc::new(AlarmShared {
                handler: Box::new(handler),
                enabled: AtomicBool::new(false),
                sched: Mutex::new(AlarmSched {
                    key: None,
                    period: INFINITE,
                }),
            }),
            clock: Arc::clone(&self.shared),
        }
    }

    /// Advances the virtual time by `period`, firing every alarm that
    /// expires in the covered interval in non-decreasing expiry order.
    ///
    /// Periodic alarms are rescheduled (`expiry += period`) before their
    /// handler runs, so a period smaller than the advance fires more than
    /// once. Handlers are invoked **outside the clock lock**; a handler may
    /// re-arm its own or any other alarm without deadlocking.
    ///
    /// A handler panic is caught and logged; the advance continues.
    pub fn sleep(&self, period: i64) {
        let mut remaining = period.max(0);
        loop {
            let expired = {
                let mut state = self.shared.state.lock();
                let target = state.now.saturating_add(remaining);
                let Some((key, alarm)) = state.pending.pop_first() else {
                    state.now = target;
                    return;
                };
                if key.expiry > target {
                    // Head not due yet; put it back and finish the advance.
                    state.pending.insert(key, alarm);
                    state.now = target;
                    return;
                }

                // An alarm expired. Advance the time to its expiry before
                // rescheduling or firing.
                remaining = remaining.saturating_sub(key.expiry.saturating_sub(state.now));
                state.now = key.expiry;

                let mut sched = alarm.sched.lock();
                if sched.period == INFINITE {
                    sched.key = None;
                    drop(sched);
                    alarm.enabled.store(false, Ordering::Release);
                } else {
                    let next = AlarmKey {
                        expiry: key.expiry.saturating_add(sched.period),
                        seq: state.next_seq,
                    };
                    state.next_seq += 1;
                    sched.key = Some(next);
                    drop(sched);
                    state.pending.insert(next, Arc::clone(&alarm));
                }
                alarm
            };
            expired.invoke_handler();
        }
    }

    /// The delay until the next alarm fires, or [`INFINITE`] if none is
    /// pending. Units match those passed to [`AlarmClock::sleep`].
    #[must_use]
    pub fn time_till_alarm(&self) -> i64 {
        let state = self.shared.state.lock();
        match state.pending.first_key_value() {
            Some((key, _)) => key.expiry.saturating_sub(state.now),
            None => INFINITE,
        }
    }

    /// The clock's current virtual time.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.shared.state.lock().now
    }
}

impl Default for AlarmClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AlarmClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("AlarmClock")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}

struct AlarmShared {
    handler: Box<dyn Fn() + Send + Sync>,

    /// Unlocked mirror of "is in the pending set", so that re-disabling an
    /// already-disabled alarm never has to take the clock lock. That path is
    /// reachable from `Drop`, where contending on the clock lock is not
    /// acceptable.
    enabled: AtomicBool,

    /// Locked after the clock state lock, never before.
    sched: Mutex<AlarmSched>,
}

#[derive(Debug, Clone, Copy)]
struct AlarmSched {
    key: Option<AlarmKey>,
    period: i64,
}

impl AlarmShared {
    fn invoke_handler(&self) {
        if panic::catch_unwind(AssertUnwindSafe(|| (self.handler)())).is_err() {
            tracing::error!("alarm handler panicked; the panic was discarded");
        }
    }
}

/// A schedulable timeout entry owned by one caller.
///
/// Created disabled by [`AlarmClock::create_alarm`]. Dropping the alarm
/// disables it.
pub struct Alarm {
    shared: Arc<AlarmShared>,
    clock: Arc<ClockShared>,
}

impl Alarm {
    /// Arms or disarms the alarm.
    ///
    /// `due_time` is the delay before the first firing (`0` fires on the
    /// next advance, [`INFINITE`] disables the alarm). `period` is the delay
    /// between subsequent firings ([`INFINITE`] makes it one-shot). The due
    /// time is converted to an absolute expiry against the clock's current
    /// virtual time; an already-armed alarm is removed and re-inserted.
    ///
    /// # Errors
    ///
    /// `due_time < 0` or `period <= 0` (other than [`INFINITE`]) produce a
    /// range error naming the parameter, before any state changes.
    pub fn set(&self, due_time: i64, period: i64) -> Result<()> {
        if due_time < 0 {
            return Err(Error::non_negative("due_time"));
        }
        if period <= 0 {
            return Err(Error::positive_non_zero("period"));
        }

        if due_time == INFINITE {
            self.cancel();
            return Ok(());
        }

        let mut state = self.clock.state.lock();
        let mut sched = self.shared.sched.lock();
        if let Some(key) = sched.key.take() {
            state.pending.remove(&key);
        }
        sched.period = period;
        let key = AlarmKey {
            expiry: state.now.saturating_add(due_time),
            seq: state.next_seq,
        };
        state.next_seq += 1;
        sched.key = Some(key);
        drop(sched);
        state.pending.insert(key, Arc::clone(&self.shared));
        self.shared.enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Disables the alarm.
    ///
    /// Disabling an already-disabled alarm returns without taking the clock
    /// lock, so this is always safe to call from `Drop`.
    pub fn cancel(&self) {
        if !self.shared.enabled.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.clock.state.lock();
        let mut sched = self.shared.sched.lock();
        if let Some(key) = sched.key.take() {
            state.pending.remove(&key);
        }
        self.shared.enabled.store(false, Ordering::Release);
    }
}

impl Drop for Alarm {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("enabled", &self.shared.enabled.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    use super::*;
    use crate::ErrorKind;

    fn counting_alarm(clock: &AlarmClock) -> (Alarm, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let alarm = clock.create_alarm(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        (alarm, fired)
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(AlarmClock: Send, Sync, Clone);
        static_assertions::assert_impl_all!(Alarm: Send, Sync);
    }

    #[test]
    fn new_alarm_is_disabled() {
        let clock = AlarmClock::new();
        let (_alarm, fired) = counting_alarm(&clock);

        assert_eq!(clock.time_till_alarm(), INFINITE);
        clock.sleep(1_000);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_shot_fires_once() {
        let clock = AlarmClock::new();
        let (alarm, fired) = counting_alarm(&clock);

        alarm.set(10, INFINITE).unwrap();
        assert_eq!(clock.time_till_alarm(), 10);

        clock.sleep(9);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.sleep(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        clock.sleep(1_000);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(clock.time_till_alarm(), INFINITE);
    }

    #[test]
    fn periodic_fires_for_every_period_in_one_sleep() {
        let clock = AlarmClock::new();
        let (alarm, fired) = counting_alarm(&clock);

        alarm.set(10, 10).unwrap();
        clock.sleep(35);

        // Due at 10, 20, 30; next at 40.
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(clock.time_till_alarm(), 5);
    }

    #[test]
    fn alarms_fire_in_expiry_order() {
        let clock = AlarmClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut alarms = Vec::new();
        for (label, due) in [("late", 30), ("early", 10), ("middle", 20)] {
            let order_clone = Arc::clone(&order);
            let alarm = clock.create_alarm(move || order_clone.lock().push(label));
            alarm.set(due, INFINITE).unwrap();
            alarms.push(alarm);
        }

        clock.sleep(30);
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn equal_expiries_fire_in_arming_order() {
        let clock = AlarmClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut alarms = Vec::new();
        for label in ["first", "second", "third"] {
            let order_clone = Arc::clone(&order);
            let alarm = clock.create_alarm(move || order_clone.lock().push(label));
            alarm.set(10, INFINITE).unwrap();
            alarms.push(alarm);
        }

        clock.sleep(10);
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn rearming_replaces_the_previous_schedule() {
        let clock = AlarmClock::new();
        let (alarm, fired) = counting_alarm(&clock);

        alarm.set(10, INFINITE).unwrap();
        alarm.set(50, INFINITE).unwrap();

        clock.sleep(10);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.sleep(40);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_expiry_suppresses_firing() {
        let clock = AlarmClock::new();
        let (alarm, fired) = counting_alarm(&clock);

        alarm.set(10, 10).unwrap();
        alarm.cancel();

        clock.sleep(100);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(clock.time_till_alarm(), INFINITE);
    }

    #[test]
    fn dropping_an_alarm_disables_it() {
        let clock = AlarmClock::new();
        let (alarm, fired) = counting_alarm(&clock);

        alarm.set(10, 10).unwrap();
        drop(alarm);

        clock.sleep(100);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_rejects_negative_due_time() {
        let clock = AlarmClock::new();
        let (alarm, _) = counting_alarm(&clock);

        let error = alarm.set(-5, INFINITE).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::NonNegative("due_time")));
    }

    #[test]
    fn set_rejects_non_positive_period() {
        let clock = AlarmClock::new();
        let (alarm, _) = counting_alarm(&clock);

        let error = alarm.set(10, 0).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::PositiveNonZero("period")));
    }

    #[test]
    fn handler_may_rearm_its_own_alarm() {
        let clock = AlarmClock::new();
        let rearmed = Arc::new(Mutex::new(None::<Alarm>));
        let fired = Arc::new(AtomicUsize::new(0));

        let rearmed_clone = Arc::clone(&rearmed);
        let fired_clone = Arc::clone(&fired);
        let alarm = clock.create_alarm(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(alarm) = rearmed_clone.lock().as_ref() {
                alarm.set(5, INFINITE).unwrap();
            }
        });
        alarm.set(5, INFINITE).unwrap();
        *rearmed.lock() = Some(alarm);

        // Each firing re-arms 5 units out; a 20-unit advance covers 5/10/15/20.
        clock.sleep(20);
        assert_eq!(fired.load(Ordering::SeqCst), 4);
        drop(rearmed.lock().take());
    }

    #[test]
    fn due_alarms_fire_at_least_once_and_remaining_are_later_than_target() {
        let clock = AlarmClock::new();
        let last_fired_at = Arc::new(AtomicI64::new(-1));

        let clock_probe = clock.clone();
        let last_clone = Arc::clone(&last_fired_at);
        let due_alarm = clock.create_alarm(move || {
            last_clone.store(clock_probe.now(), Ordering::SeqCst);
        });
        due_alarm.set(40, INFINITE).unwrap();

        let (late_alarm, late_fired) = counting_alarm(&clock);
        late_alarm.set(60, INFINITE).unwrap();

        clock.sleep(50);

        // The due alarm fired with the clock advanced exactly to its expiry.
        assert_eq!(last_fired_at.load(Ordering::SeqCst), 40);
        assert_eq!(clock.now(), 50);

        // The surviving alarm still expires after the covered interval.
        assert_eq!(late_fired.load(Ordering::SeqCst), 0);
        assert_eq!(clock.time_till_alarm(), 10);
    }

    #[test]
    fn handler_panic_is_isolated() {
        let clock = AlarmClock::new();
        let alarm = clock.create_alarm(|| panic!("boom"));
        alarm.set(5, INFINITE).unwrap();

        let (after, fired) = counting_alarm(&clock);
        after.set(10, INFINITE).unwrap();

        clock.sleep(10);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
