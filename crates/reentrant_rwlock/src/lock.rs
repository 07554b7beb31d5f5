// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};
use std::time::Instant;

use sched_primitives::{Monitor, MonitorGuard, Timeout};

use crate::{CookieKind, LockCookie, LockError};

/// A re-entrant reader/writer lock with per-thread hold counts.
///
/// Any number of threads may hold read locks concurrently while no thread
/// holds the write lock; the write lock is exclusive against everyone else
/// but freely recursive for its holder, who may also keep acquiring read
/// locks. See the [crate docs](crate) for the fairness caveats.
///
/// Blocking operations take a [`Timeout`]; expiry is a normal `false` or
/// ineffective-cookie return, never an error. The one contract violation is
/// releasing the writer lock while the same thread still holds read locks
/// ([`LockError::ReadersStillHeld`]).
///
/// # Examples
///
/// ```
/// use reentrant_rwlock::ReaderWriterLock;
/// use sched_primitives::Timeout;
///
/// let lock = ReaderWriterLock::new();
///
/// assert!(lock.acquire_reader_lock(Timeout::INFINITE));
/// assert!(lock.is_reader_lock_held());
///
/// let cookie = lock.upgrade_to_writer_lock(Timeout::INFINITE);
/// assert!(lock.is_writer_lock_held());
///
/// lock.downgrade_from_writer_lock(cookie);
/// assert!(lock.is_reader_lock_held());
/// lock.release_reader_lock();
/// ```
pub struct ReaderWriterLock {
    state: Monitor<LockState>,
}

#[derive(Default)]
struct LockState {
    num_read_locks: u32,
    num_write_locks: u32,
    seq_num: u64,
    last_write_seq_num: u64,

    /// Per-thread hold counts, created lazily and never removed; a thread
    /// that has touched the lock keeps its (possibly zeroed) entry.
    threads: HashMap<ThreadId, ThreadLocks>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadLocks {
    read: u32,
    write: u32,
}

impl LockState {
    fn holds(&self, thread: ThreadId) -> ThreadLocks {
        self.threads.get(&thread).copied().unwrap_or_default()
    }

    fn entry(&mut self, thread: ThreadId) -> &mut ThreadLocks {
        self.threads.entry(thread).or_default()
    }

    fn bump_writer_seq(&mut self) {
        self.seq_num += 1;
        self.last_write_seq_num = self.seq_num;
    }
}

impl ReaderWriterLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Monitor::new(LockState::default()),
        }
    }

    /// Acquires (or recursively re-acquires) a read lock.
    ///
    /// Blocks while another thread holds the write lock; a thread already
    /// holding the write lock may take read locks without blocking. Returns
    /// `false` without the lock when `timeout` expires first.
    pub fn acquire_reader_lock(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        let mut guard = self.state.enter();
        let acquired = wait_while(&mut guard, timeout.deadline(), |state| {
            state.holds(me).write == 0 && state.num_write_locks > 0
        });
        if !acquired {
            return false;
        }
        guard.entry(me).read += 1;
        guard.num_read_locks += 1;
        true
    }

    /// Acquires (or recursively re-acquires) the write lock.
    ///
    /// A thread already holding the write lock bumps its count without
    /// blocking; otherwise blocks while any read or write lock is
    /// outstanding. Every successful acquisition advances the writer
    /// sequence number. Returns `false` without the lock when `timeout`
    /// expires first.
    pub fn acquire_writer_lock(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        let mut guard = self.state.enter();

        if guard.holds(me).write > 0 {
            guard.entry(me).write += 1;
            guard.num_write_locks += 1;
            guard.bump_writer_seq();
            return true;
        }

        let acquired = wait_while(&mut guard, timeout.deadline(), |state| {
            state.num_read_locks > 0 || state.num_write_locks > 0
        });
        if !acquired {
            return false;
        }
        guard.entry(me).write += 1;
        guard.num_write_locks += 1;
        guard.bump_writer_seq();
        true
    }

    /// Releases one of the calling thread's read locks.
    ///
    /// A no-op if the thread holds none. Wakes one waiter when a global
    /// count returns to zero.
    pub fn release_reader_lock(&self) {
        let me = thread::current().id();
        let mut guard = self.state.enter();
        if guard.holds(me).read == 0 {
            return;
        }
        guard.entry(me).read -= 1;
        guard.num_read_locks -= 1;
        if guard.num_read_locks == 0 || guard.num_write_locks == 0 {
            guard.pulse();
        }
    }

    /// Releases one of the calling thread's write locks.
    ///
    /// Releasing without holding the write lock is a silent no-op.
    ///
    /// # Errors
    ///
    /// [`LockError::ReadersStillHeld`] if the thread still holds read locks;
    /// those must be released before the thread's writes, and the lock state
    /// is left untouched.
    pub fn release_writer_lock(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut guard = self.state.enter();
        let holds = guard.holds(me);
        if holds.read > 0 {
            return Err(LockError::ReadersStillHeld);
        }
        if holds.write == 0 {
            return Ok(());
        }
        guard.entry(me).write -= 1;
        guard.num_write_locks -= 1;
        if guard.num_write_locks == 0 {
            guard.pulse();
        }
        Ok(())
    }

    /// Converts the calling thread's holds into a write lock, returning a
    /// cookie that [`downgrade_from_writer_lock`](Self::downgrade_from_writer_lock)
    /// redeems for the exact pre-upgrade shape.
    ///
    /// Three cases:
    /// - already a writer: recursive bump, no blocking;
    /// - holds only read locks: the read count is converted into write count
    ///   in one step under the monitor, so no competing writer can slip in
    ///   between the check and the conversion;
    /// - holds nothing: an ordinary blocking write acquisition.
    ///
    /// On timeout the returned cookie is ineffective
    /// ([`LockCookie::is_effective`] is `false`) and nothing was acquired.
    pub fn upgrade_to_writer_lock(&self, timeout: Timeout) -> LockCookie {
        let me = thread::current().id();
        let mut guard = self.state.enter();
        let holds = guard.holds(me);

        if holds.write > 0 {
            let cookie = upgrade_cookie(me, holds);
            guard.entry(me).write += 1;
            guard.num_write_locks += 1;
            guard.bump_writer_seq();
            return cookie;
        }

        if holds.read > 0 {
            let cookie = upgrade_cookie(me, holds);
            let converted = holds.read;
            let entry = guard.entry(me);
            entry.write += converted;
            entry.read = 0;
            guard.num_read_locks -= converted;
            guard.num_write_locks += converted;
            guard.bump_writer_seq();
            return cookie;
        }

        let acquired = wait_while(&mut guard, timeout.deadline(), |state| {
            state.num_read_locks > 0 || state.num_write_locks > 0
        });
        if !acquired {
            return LockCookie::none(me);
        }
        let cookie = upgrade_cookie(me, guard.holds(me));
        guard.entry(me).write += 1;
        guard.num_write_locks += 1;
        guard.bump_writer_seq();
        cookie
    }

    /// Returns the thread to the hold counts recorded in an upgrade cookie.
    ///
    /// Ignores cookies produced on another thread and ineffective cookies.
    /// Blocks if restoring the saved shape has to wait for other holders to
    /// clear (possible after a chain of upgrades).
    pub fn downgrade_from_writer_lock(&self, cookie: LockCookie) {
        let me = thread::current().id();
        if cookie.kind != CookieKind::Upgrade || cookie.thread != me {
            return;
        }
        let mut guard = self.state.enter();
        if !guard.threads.contains_key(&me) {
            return;
        }
        restore_lock_state(&mut guard, me, cookie.read, cookie.write);
    }

    /// Releases every lock the calling thread holds, returning a cookie for
    /// [`restore_lock`](Self::restore_lock).
    ///
    /// Used to shed lock state before a blocking external call. If the
    /// thread holds nothing the cookie is ineffective. Wakes a waiter when a
    /// global count returns to zero.
    pub fn release_lock(&self) -> LockCookie {
        let me = thread::current().id();
        let mut guard = self.state.enter();
        let holds = guard.holds(me);
        if holds.read == 0 && holds.write == 0 {
            return LockCookie::none(me);
        }

        let cookie = LockCookie {
            kind: CookieKind::Saved,
            thread: me,
            read: holds.read,
            write: holds.write,
        };
        guard.num_read_locks -= holds.read;
        guard.num_write_locks -= holds.write;
        *guard.entry(me) = ThreadLocks::default();
        if guard.num_read_locks == 0 || guard.num_write_locks == 0 {
            guard.pulse();
        }
        cookie
    }

    /// Reacquires the set of locks recorded in a
    /// [`release_lock`](Self::release_lock) cookie, blocking until the saved
    /// shape is legal again.
    ///
    /// Ignores cookies produced on another thread, ineffective cookies, and
    /// calls made while the thread already holds locks.
    pub fn restore_lock(&self, cookie: LockCookie) {
        let me = thread::current().id();
        if cookie.kind != CookieKind::Saved || cookie.thread != me {
            return;
        }
        let mut guard = self.state.enter();
        let holds = guard.holds(me);
        if holds.read > 0 || holds.write > 0 {
            return;
        }
        restore_lock_state(&mut guard, me, cookie.read, cookie.write);
    }

    /// Whether the calling thread holds at least one read lock.
    #[must_use]
    pub fn is_reader_lock_held(&self) -> bool {
        let me = thread::current().id();
        self.state.enter().holds(me).read > 0
    }

    /// Whether the calling thread holds the write lock.
    #[must_use]
    pub fn is_writer_lock_held(&self) -> bool {
        let me = thread::current().id();
        self.state.enter().holds(me).write > 0
    }

    /// The current writer sequence number; advanced by every successful
    /// write acquisition.
    #[must_use]
    pub fn writer_seq_num(&self) -> u64 {
        self.state.enter().seq_num
    }

    /// Whether any writer has acquired the lock since the sequence number
    /// `seq_num` was observed via [`writer_seq_num`](Self::writer_seq_num).
    #[must_use]
    pub fn any_writers_since(&self, seq_num: u64) -> bool {
        seq_num < self.state.enter().last_write_seq_num
    }
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReaderWriterLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.enter();
        f.debug_struct("ReaderWriterLock")
            .field("num_read_locks", &state.num_read_locks)
            .field("num_write_locks", &state.num_write_locks)
            .field("seq_num", &state.seq_num)
            .finish()
    }
}

fn upgrade_cookie(thread: ThreadId, holds: ThreadLocks) -> LockCookie {
    LockCookie {
        kind: CookieKind::Upgrade,
        thread,
        read: holds.read,
        write: holds.write,
    }
}

/// Waits on the monitor while `blocked` holds, tolerating spurious wakeups.
///
/// Returns `false` on deadline expiry with `blocked` still true; a wait that
/// times out just as the condition clears still succeeds.
fn wait_while(
    guard: &mut MonitorGuard<'_, LockState>,
    deadline: Option<Instant>,
    blocked: impl Fn(&LockState) -> bool,
) -> bool {
    while blocked(&*guard) {
        match deadline {
            None => guard.wait(),
            Some(deadline) => {
                if !guard.wait_until(deadline) && blocked(&*guard) {
                    return false;
                }
            }
        }
    }
    true
}

/// Drops everything the thread holds, then blocks until `read`/`write` locks
/// can be legally re-established and establishes them.
///
/// Read-only shapes wait for writers to clear; any write-bearing shape waits
/// for both readers and writers to clear, so a restored writer never
/// coexists with foreign read locks.
fn restore_lock_state(
    guard: &mut MonitorGuard<'_, LockState>,
    me: ThreadId,
    read: u32,
    write: u32,
) {
    let holds = guard.holds(me);
    guard.num_read_locks -= holds.read;
    guard.num_write_locks -= holds.write;
    *guard.entry(me) = ThreadLocks::default();
    if guard.num_read_locks == 0 || guard.num_write_locks == 0 {
        guard.pulse();
    }

    if write > 0 {
        while guard.num_read_locks > 0 || guard.num_write_locks > 0 {
            guard.wait();
        }
        let entry = guard.entry(me);
        entry.read = read;
        entry.write = write;
        guard.num_read_locks += read;
        guard.num_write_locks += write;
    } else if read > 0 {
        while guard.num_write_locks > 0 {
            guard.wait();
        }
        guard.entry(me).read = read;
        guard.num_read_locks += read;
    }
}
