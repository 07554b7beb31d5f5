// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sched_primitives::{CapturedContext, Timeout, WaitHandle};

/// A general-purpose callback queued for deferred execution.
pub type WorkCallback = Box<dyn FnOnce() + Send + 'static>;

/// The callback of a registered wait; receives `true` when invoked because
/// the wait timed out rather than being signaled.
pub type WaitOrTimerCallback = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// A queued unit of deferred execution, one variant per kind of work.
///
/// Every variant carries the ambient context captured when it was enqueued;
/// the context is restored on the executing thread before user code runs.
pub(crate) enum WorkItem {
    /// A callback posted by [`queue_user_work_item`](crate::ThreadPool::queue_user_work_item).
    User {
        callback: WorkCallback,
        context: Box<dyn CapturedContext>,
    },

    /// The continuation of an asynchronous operation, dispatched from the
    /// completion queue.
    AsyncCompletion {
        callback: WorkCallback,
        context: Box<dyn CapturedContext>,
    },

    /// A wait-handle watch; occupies its worker thread for as long as the
    /// registration stays alive.
    RegisteredWait {
        wait: Arc<RegisteredWait>,
        context: Box<dyn CapturedContext>,
    },
}

/// Shared state of a registered wait, owned jointly by the queued item and
/// the handle returned to the caller.
pub(crate) struct RegisteredWait {
    pub(crate) wait_object: Arc<dyn WaitHandle>,
    pub(crate) callback: WaitOrTimerCallback,
    pub(crate) timeout: Timeout,
    pub(crate) once: bool,
    pub(crate) registered: AtomicBool,
}

impl WorkItem {
    /// Runs the item on the current thread.
    ///
    /// The captured context is restored first; a panic escaping user code is
    /// caught and discarded so the executing pool thread survives.
    pub(crate) fn execute(self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match self {
            Self::User { callback, context } | Self::AsyncCompletion { callback, context } => {
                context.restore();
                callback();
            }
            Self::RegisteredWait { wait, context } => {
                context.restore();
                wait.watch();
            }
        }));
        if outcome.is_err() {
            tracing::error!("work item panicked; the panic was discarded");
        }
    }
}

impl RegisteredWait {
    /// The wait loop: invoke the callback with `timed_out = false` whenever
    /// the handle is signaled, with `true` when the per-iteration timeout
    /// expires while still registered, repeating until unregistered or (for
    /// a one-shot registration) after the first invocation.
    fn watch(&self) {
        loop {
            if self.wait_object.wait_one(self.timeout) {
                (self.callback)(false);
            } else if self.registered.load(Ordering::Acquire) {
                (self.callback)(true);
            }
            if !self.registered.load(Ordering::Acquire) || self.once {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use sched_primitives::{AutoResetEvent, ContextCapture, NoContext};

    use super::*;

    fn no_context() -> Box<dyn CapturedContext> {
        NoContext.capture()
    }

    #[test]
    fn user_item_runs_its_callback() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let item = WorkItem::User {
            callback: Box::new(move || ran_clone.store(true, Ordering::SeqCst)),
            context: no_context(),
        };

        item.execute();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_item_is_contained() {
        let item = WorkItem::User {
            callback: Box::new(|| panic!("boom")),
            context: no_context(),
        };

        // Must not propagate.
        item.execute();
    }

    #[test]
    fn one_shot_wait_fires_once_on_signal() {
        let event = Arc::new(AutoResetEvent::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let timed_out_seen = Arc::new(AtomicBool::new(false));

        let calls_clone = Arc::clone(&calls);
        let timed_out_clone = Arc::clone(&timed_out_seen);
        let wait = RegisteredWait {
            wait_object: event,
            callback: Arc::new(move |timed_out| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                if timed_out {
                    timed_out_clone.store(true, Ordering::SeqCst);
                }
            }),
            timeout: Timeout::from_millis(0),
            once: true,
            registered: AtomicBool::new(true),
        };

        wait.watch();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!timed_out_seen.load(Ordering::SeqCst));
    }

    #[test]
    fn repeating_wait_reports_timeouts_until_unregistered() {
        let event = Arc::new(AutoResetEvent::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        // The callback unregisters its own wait after the third timeout.
        let calls_clone = Arc::clone(&calls);
        let wait = Arc::new_cyclic(|weak: &std::sync::Weak<RegisteredWait>| {
            let weak = std::sync::Weak::clone(weak);
            RegisteredWait {
                wait_object: event,
                callback: Arc::new(move |timed_out| {
                    assert!(timed_out);
                    if calls_clone.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        if let Some(wait) = weak.upgrade() {
                            wait.registered.store(false, Ordering::Release);
                        }
                    }
                }),
                timeout: Timeout::from_millis(1),
                once: false,
                registered: AtomicBool::new(true),
            }
        });

        wait.watch();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unregistered_wait_suppresses_timeout_callback() {
        let event = Arc::new(AutoResetEvent::new(false));
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let wait = RegisteredWait {
            wait_object: event,
            callback: Arc::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
            timeout: Timeout::from_millis(1),
            once: false,
            registered: AtomicBool::new(false),
        };

        wait.watch();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
