// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scheduler primitives for the user-mode concurrency coordination layer.
//!
//! This crate provides the small set of host primitives the coordination
//! components are built on, so that tests can substitute their own:
//!
//! - [`Monitor`]: mutual exclusion plus condition wait/pulse, the building
//!   block for every blocking operation in the layer.
//! - [`Timeout`]: the millisecond timeout contract shared by all blocking
//!   calls, including the `-1`-means-infinite sentinel.
//! - [`AutoResetEvent`] and [`ManualResetEvent`]: waitable handles
//!   implementing [`WaitHandle`] (timed wait) and [`Signal`] (one-way wake).
//! - [`Spawner`]: detached-thread creation with an availability probe, so
//!   hosts without threads degrade gracefully.
//! - [`ContextCapture`]: an optional ambient-context capture/restore hook
//!   applied around deferred work; [`NoContext`] is the no-op default.
//!
//! All blocking waits tolerate spurious wakeups by re-checking their
//! condition against an absolute deadline.

mod context;
mod events;
mod monitor;
mod spawner;
mod timeout;

pub use context::*;
pub use events::*;
pub use monitor::*;
pub use spawner::*;
pub use timeout::*;
