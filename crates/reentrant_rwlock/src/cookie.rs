// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::thread::ThreadId;

/// An opaque snapshot of one thread's read/write hold counts.
///
/// Produced by [`upgrade_to_writer_lock`](crate::ReaderWriterLock::upgrade_to_writer_lock)
/// and [`release_lock`](crate::ReaderWriterLock::release_lock), and consumed
/// by value by the matching restore operation, so a cookie can be redeemed at
/// most once. A cookie is only honored on the thread that produced it.
#[derive(Debug)]
#[must_use = "a cookie is the only way to restore the saved lock state"]
pub struct LockCookie {
    pub(crate) kind: CookieKind,
    pub(crate) thread: ThreadId,
    pub(crate) read: u32,
    pub(crate) write: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CookieKind {
    /// The operation acquired nothing (timed out or there was nothing to
    /// save); restoring is a no-op.
    None,

    /// Counts as they were before an upgrade to the writer lock.
    Upgrade,

    /// Counts saved by releasing every lock the thread held.
    Saved,
}

impl LockCookie {
    pub(crate) fn none(thread: ThreadId) -> Self {
        Self {
            kind: CookieKind::None,
            thread,
            read: 0,
            write: 0,
        }
    }

    /// Whether the producing operation actually took or saved locks.
    ///
    /// `false` for the cookie of a timed-out upgrade or an empty save.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.kind != CookieKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(LockCookie: Send);
    }

    #[test]
    fn none_cookie_is_not_effective() {
        let cookie = LockCookie::none(std::thread::current().id());
        assert!(!cookie.is_effective());
    }
}
