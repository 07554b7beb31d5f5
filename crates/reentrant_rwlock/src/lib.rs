// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A re-entrant reader/writer lock.
//!
//! [`ReaderWriterLock`] tracks read and write hold counts per thread, so a
//! thread may acquire either lock recursively, hold both at once, upgrade
//! its read locks to a write lock and downgrade back, or shed everything it
//! holds into a [`LockCookie`] before a blocking call and restore it later.
//!
//! There is no fairness queue: when the lock frees up, whichever blocked
//! thread wakes first proceeds, and a writer can starve under continuous
//! reader pressure. Timed acquisitions return `false` on expiry rather than
//! erroring.

mod cookie;
mod error;
mod lock;

pub use cookie::*;
pub use error::*;
pub use lock::*;
