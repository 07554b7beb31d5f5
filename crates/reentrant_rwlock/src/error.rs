// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A contract violation by the calling thread.
///
/// These indicate application-logic errors, not transient conditions; the
/// lock state is left untouched.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The writer lock was released while the calling thread still held read
    /// locks. Reads must be released before the thread's writes.
    #[error("writer lock released while the calling thread still holds read locks")]
    ReadersStillHeld,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(LockError: Send, Sync);
    }
}
