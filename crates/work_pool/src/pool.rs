// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use sched_primitives::{
    ContextCapture, InvalidTimeout, Monitor, MonitorGuard, NoContext, Spawner, Timeout, WaitHandle,
};

use crate::work_item::{RegisteredWait, WorkItem};
use crate::{Error, Result};

/// Most worker threads a pool will spawn for its work queue.
pub const MAX_WORKER_THREADS: usize = 16;

/// Most worker threads a pool will spawn for its completion queue.
pub const MAX_COMPLETION_THREADS: usize = 16;

/// Fewest worker threads kept for the work queue; the pool grows on demand.
pub const MIN_WORKER_THREADS: usize = 0;

/// Fewest worker threads kept for the completion queue.
pub const MIN_COMPLETION_THREADS: usize = 0;

/// Two demand-grown pools of detached worker threads, one for general work
/// and one for completions of asynchronous operations.
///
/// See the [crate docs](crate) for the dispatch model. Use
/// [`ThreadPool::global`] for the process-wide pool; construct instances with
/// [`ThreadPool::with_spawner`] to inject thread creation and ambient-context
/// capture in tests or on constrained hosts.
///
/// Cloning is cheap and clones share the same queues and threads.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    spawner: Spawner,
    ambient: Arc<dyn ContextCapture>,
    work: Arc<PoolQueue>,
    completion: Arc<PoolQueue>,
}

struct PoolQueue {
    label: &'static str,
    max_threads: usize,
    state: Monitor<QueueState>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    spawned_threads: usize,
    used_threads: usize,
}

static GLOBAL: Lazy<ThreadPool> =
    Lazy::new(|| ThreadPool::with_spawner(Spawner::new_os(), Arc::new(NoContext)));

impl ThreadPool {
    /// The process-wide pool, lazily created on first use and never torn
    /// down.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Creates an independent pool.
    ///
    /// `spawner` provides worker threads (a spawner that cannot spawn makes
    /// every enqueue execute synchronously on the caller); `ambient` captures
    /// the context to restore around each work item.
    #[must_use]
    pub fn with_spawner(spawner: Spawner, ambient: Arc<dyn ContextCapture>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                spawner,
                ambient,
                work: Arc::new(PoolQueue {
                    label: "pool-worker",
                    max_threads: MAX_WORKER_THREADS,
                    state: Monitor::new(QueueState::default()),
                }),
                completion: Arc::new(PoolQueue {
                    label: "pool-completion",
                    max_threads: MAX_COMPLETION_THREADS,
                    state: Monitor::new(QueueState::default()),
                }),
            }),
        }
    }

    /// Queues `callback` for execution on a work-queue thread.
    ///
    /// Never blocks the caller (on a host without threads the queued items
    /// run synchronously before this returns). Always returns `true`; the
    /// return type mirrors the preserved interface.
    pub fn queue_user_work_item(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        let item = WorkItem::User {
            callback: Box::new(callback),
            context: self.inner.ambient.capture(),
        };
        self.inner.enqueue_work(item);
        true
    }

    /// Queues the continuation of an asynchronous operation on a
    /// completion-queue thread.
    ///
    /// Saturating the completion pool is not an error: the item stays queued
    /// and runs once a thread frees up.
    pub fn queue_completion_item(&self, callback: impl FnOnce() + Send + 'static) -> bool {
        let item = WorkItem::AsyncCompletion {
            callback: Box::new(callback),
            context: self.inner.ambient.capture(),
        };
        self.inner.enqueue_completion(item);
        true
    }

    /// Registers `callback` to be invoked whenever `wait_object` is signaled,
    /// or with `timed_out = true` when `timeout_ms` elapses first.
    ///
    /// The watch occupies one work-queue thread for as long as it stays
    /// registered. With `once` the registration ends after the first
    /// invocation; otherwise it repeats until
    /// [`RegisteredWaitHandle::unregister`] is called. Unregistration stops
    /// further dispatch and suppresses a pending timeout invocation, but does
    /// not interrupt a callback already running.
    ///
    /// # Errors
    ///
    /// Fails if `timeout_ms` is below `-1` (`-1` waits forever).
    pub fn register_wait_for_single_object(
        &self,
        wait_object: Arc<dyn WaitHandle>,
        callback: impl Fn(bool) + Send + Sync + 'static,
        timeout_ms: i64,
        once: bool,
    ) -> Result<RegisteredWaitHandle> {
        let timeout = Timeout::try_from_millis(timeout_ms)
            .map_err(|InvalidTimeout| Error::non_neg_or_neg_one("timeout_ms"))?;

        let wait = Arc::new(RegisteredWait {
            wait_object,
            callback: Arc::new(callback),
            timeout,
            once,
            registered: AtomicBool::new(true),
        });
        let item = WorkItem::RegisteredWait {
            wait: Arc::clone(&wait),
            context: self.inner.ambient.capture(),
        };
        self.inner.enqueue_work(item);
        Ok(RegisteredWaitHandle { wait })
    }

    /// The `(work, completion)` thread maxima.
    #[must_use]
    pub fn get_max_threads(&self) -> (usize, usize) {
        (MAX_WORKER_THREADS, MAX_COMPLETION_THREADS)
    }

    /// The `(work, completion)` thread minima.
    #[must_use]
    pub fn get_min_threads(&self) -> (usize, usize) {
        (MIN_WORKER_THREADS, MIN_COMPLETION_THREADS)
    }

    /// How many more `(work, completion)` threads could be executing items
    /// right now.
    #[must_use]
    pub fn get_available_threads(&self) -> (usize, usize) {
        let work = MAX_WORKER_THREADS - self.inner.work.state.enter().used_threads;
        let completion =
            MAX_COMPLETION_THREADS - self.inner.completion.state.enter().used_threads;
        (work, completion)
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let work = self.inner.work.state.enter().items.len();
        let completion = self.inner.completion.state.enter().items.len();
        f.debug_struct("ThreadPool")
            .field("queued_work", &work)
            .field("queued_completion", &completion)
            .finish()
    }
}

impl PoolInner {
    fn enqueue_work(&self, item: WorkItem) {
        if !self.spawner.can_spawn() {
            self.work.run_synchronously(item);
            return;
        }

        let mut state = self.work.state.enter();
        state.items.push_back(item);
        if state.spawned_threads < self.work.max_threads {
            self.grow(&self.work, &mut state);
        }
        state.pulse();
    }

    fn enqueue_completion(&self, item: WorkItem) {
        if !self.spawner.can_spawn() {
            self.completion.run_synchronously(item);
            return;
        }

        let mut state = self.completion.state.enter();
        state.items.push_back(item);

        // Enough threads to drain the whole queue, counting the ones already
        // busy. A thread may be about to finish and take this item, but that
        // cannot be observed from here.
        let needed = state.used_threads + state.items.len();
        if needed <= state.spawned_threads {
            state.pulse();
            return;
        }
        if needed > self.completion.max_threads {
            // Saturated. The item stays queued; wake a thread only if one is
            // actually idle.
            tracing::warn!(
                queued = state.items.len(),
                max_threads = self.completion.max_threads,
                "completion pool saturated, leaving item queued"
            );
            if state.used_threads < state.spawned_threads {
                state.pulse();
            }
            return;
        }
        self.grow(&self.completion, &mut state);
    }

    /// Spawns one more detached worker for `queue`. On spawn failure the
    /// item stays queued for the existing threads, so a waiter is pulsed
    /// instead.
    fn grow(&self, queue: &Arc<PoolQueue>, state: &mut MonitorGuard<'_, QueueState>) {
        let name = format!("{}-{}", queue.label, state.spawned_threads);
        let worker_queue = Arc::clone(queue);
        match self.spawner.spawn(&name, move || run_worker(&worker_queue)) {
            Ok(()) => state.spawned_threads += 1,
            Err(error) => {
                tracing::warn!(%error, thread = %name, "failed to grow the pool");
                state.pulse();
            }
        }
    }
}

impl PoolQueue {
    /// Thread-less dispatch: append, then drain everything queued on the
    /// caller.
    fn run_synchronously(&self, item: WorkItem) {
        self.state.enter().items.push_back(item);
        loop {
            let Some(next) = self.state.enter().items.pop_front() else {
                return;
            };
            next.execute();
        }
    }
}

/// The body of every pool thread: block on the queue's monitor until an item
/// is available, execute it, repeat forever.
#[cfg_attr(test, mutants::skip)] // endless loop
fn run_worker(queue: &Arc<PoolQueue>) {
    loop {
        let item = {
            let mut state = queue.state.enter();
            loop {
                if let Some(item) = state.items.pop_front() {
                    state.used_threads += 1;
                    break item;
                }
                state.wait();
            }
        };
        item.execute();
        queue.state.enter().used_threads -= 1;
    }
}

/// Handle for cancelling a registered wait.
pub struct RegisteredWaitHandle {
    wait: Arc<RegisteredWait>,
}

impl RegisteredWaitHandle {
    /// Ends the registration.
    ///
    /// Returns `true` the first time, `false` on repeated calls. The wait
    /// loop stops re-dispatching and a not-yet-delivered timeout invocation
    /// is suppressed; a callback already executing runs to completion.
    pub fn unregister(&self) -> bool {
        self.wait.registered.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for RegisteredWaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredWaitHandle")
            .field("registered", &self.wait.registered.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;
    use sched_primitives::{AutoResetEvent, CapturedContext, ManualResetEvent};

    use crate::ErrorKind;

    use super::*;

    fn os_pool() -> ThreadPool {
        ThreadPool::with_spawner(Spawner::new_os(), Arc::new(NoContext))
    }

    /// Counts down from `n`; signals once it reaches zero.
    struct Countdown {
        remaining: AtomicUsize,
        done: ManualResetEvent,
    }

    impl Countdown {
        fn new(n: usize) -> Arc<Self> {
            Arc::new(Self {
                remaining: AtomicUsize::new(n),
                done: ManualResetEvent::new(n == 0),
            })
        }

        fn tick(&self) {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.done.set();
            }
        }

        fn await_done(&self) -> bool {
            self.done.wait_one(Timeout::from_millis(30_000))
        }
    }

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ThreadPool: Send, Sync, Clone);
        static_assertions::assert_impl_all!(RegisteredWaitHandle: Send, Sync);
    }

    #[test]
    fn constants_match_the_preserved_interface() {
        let pool = os_pool();
        assert_eq!(pool.get_max_threads(), (16, 16));
        assert_eq!(pool.get_min_threads(), (0, 0));
    }

    #[test]
    fn queued_items_all_execute_within_the_thread_bound() {
        let pool = os_pool();
        let countdown = Countdown::new(100);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let countdown = Arc::clone(&countdown);
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            assert!(pool.queue_user_work_item(move || {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                live.fetch_sub(1, Ordering::SeqCst);
                countdown.tick();
            }));
        }

        assert!(countdown.await_done());
        assert!(peak.load(Ordering::SeqCst) <= MAX_WORKER_THREADS);
    }

    #[test]
    fn completion_saturation_is_not_an_error_and_every_item_runs() {
        let pool = os_pool();
        let gate = Arc::new(ManualResetEvent::new(false));
        let countdown = Countdown::new(64);

        // The first wave fills every completion thread; the rest must sit in
        // the queue until the gate opens.
        for _ in 0..64 {
            let gate = Arc::clone(&gate);
            let countdown = Arc::clone(&countdown);
            assert!(pool.queue_completion_item(move || {
                gate.wait_one(Timeout::from_millis(30_000));
                countdown.tick();
            }));
        }

        gate.set();
        assert!(countdown.await_done());
    }

    #[test]
    fn work_items_run_in_fifo_order_without_threads() {
        let pool = ThreadPool::with_spawner(Spawner::new_disabled(), Arc::new(NoContext));
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            // With no threads the item runs before queue_user_work_item
            // returns.
            assert!(pool.queue_user_work_item(move || order.lock().push(label)));
        }

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn completion_items_fall_back_to_the_caller_without_threads() {
        let pool = ThreadPool::with_spawner(Spawner::new_disabled(), Arc::new(NoContext));
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_clone = Arc::clone(&ran);
        assert!(pool.queue_completion_item(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_item_does_not_kill_the_pool() {
        let pool = os_pool();
        pool.queue_user_work_item(|| panic!("boom"));

        let countdown = Countdown::new(1);
        let countdown_clone = Arc::clone(&countdown);
        pool.queue_user_work_item(move || countdown_clone.tick());
        assert!(countdown.await_done());
    }

    #[test]
    fn registered_wait_fires_on_signal() {
        let pool = os_pool();
        let event = Arc::new(AutoResetEvent::new(false));
        let fired = Arc::new(AutoResetEvent::new(false));

        let fired_clone = Arc::clone(&fired);
        let handle = pool
            .register_wait_for_single_object(
                Arc::clone(&event) as Arc<dyn WaitHandle>,
                move |timed_out| {
                    assert!(!timed_out);
                    fired_clone.set();
                },
                -1,
                false,
            )
            .unwrap();

        event.set();
        assert!(fired.wait_one(Timeout::from_millis(30_000)));

        assert!(handle.unregister());
        assert!(!handle.unregister());
    }

    #[test]
    fn registered_wait_reports_timeouts() {
        let pool = os_pool();
        let event = Arc::new(AutoResetEvent::new(false));
        let timed_out_seen = Arc::new(AutoResetEvent::new(false));

        let timed_out_clone = Arc::clone(&timed_out_seen);
        let handle = pool
            .register_wait_for_single_object(
                Arc::clone(&event) as Arc<dyn WaitHandle>,
                move |timed_out| {
                    if timed_out {
                        timed_out_clone.set();
                    }
                },
                5,
                false,
            )
            .unwrap();

        assert!(timed_out_seen.wait_one(Timeout::from_millis(30_000)));
        handle.unregister();
    }

    #[test]
    fn one_shot_registered_wait_invokes_once() {
        let pool = os_pool();
        let event = Arc::new(AutoResetEvent::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let countdown = Countdown::new(1);

        let calls_clone = Arc::clone(&calls);
        let countdown_clone = Arc::clone(&countdown);
        let _handle = pool
            .register_wait_for_single_object(
                Arc::clone(&event) as Arc<dyn WaitHandle>,
                move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    countdown_clone.tick();
                },
                -1,
                true,
            )
            .unwrap();

        assert!(countdown.await_done());
        event.set();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_wait_rejects_out_of_range_timeout() {
        let pool = os_pool();
        let event = Arc::new(AutoResetEvent::new(false));

        let error = pool
            .register_wait_for_single_object(event as Arc<dyn WaitHandle>, |_| {}, -2, true)
            .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::NonNegOrNegOne("timeout_ms")
        ));
    }

    struct CountingCapture {
        restores: Arc<AtomicUsize>,
    }

    struct CountingRestore {
        restores: Arc<AtomicUsize>,
    }

    impl ContextCapture for CountingCapture {
        fn capture(&self) -> Box<dyn CapturedContext> {
            Box::new(CountingRestore {
                restores: Arc::clone(&self.restores),
            })
        }
    }

    impl CapturedContext for CountingRestore {
        fn restore(&self) {
            self.restores.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ambient_context_is_restored_before_the_callback() {
        let restores = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::with_spawner(
            Spawner::new_disabled(),
            Arc::new(CountingCapture {
                restores: Arc::clone(&restores),
            }),
        );

        let restores_at_callback = Arc::new(AtomicUsize::new(usize::MAX));
        let restores_clone = Arc::clone(&restores);
        let seen = Arc::clone(&restores_at_callback);
        pool.queue_user_work_item(move || {
            seen.store(restores_clone.load(Ordering::SeqCst), Ordering::SeqCst);
        });

        assert_eq!(restores.load(Ordering::SeqCst), 1);
        assert_eq!(restores_at_callback.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn available_threads_start_at_the_maximum() {
        let pool = os_pool();
        assert_eq!(
            pool.get_available_threads(),
            (MAX_WORKER_THREADS, MAX_COMPLETION_THREADS)
        );
    }
}
