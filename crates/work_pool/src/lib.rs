// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demand-grown thread pools for deferred work.
//!
//! A [`ThreadPool`] runs two independent queue/thread-set pairs sharing one
//! dispatch pattern:
//!
//! - the **work** queue for general-purpose callbacks
//!   ([`ThreadPool::queue_user_work_item`]) and registered waits
//!   ([`ThreadPool::register_wait_for_single_object`]);
//! - the **completion** queue for continuations of asynchronous operations
//!   ([`ThreadPool::queue_completion_item`]).
//!
//! Enqueuing never blocks the producer: the item is appended, a new detached
//! thread is spawned while the pair is below its maximum, and one idle thread
//! is pulsed. Items are dispatched FIFO per queue, with no priorities. On a
//! host without threads, enqueuing drains the queue synchronously on the
//! caller instead.
//!
//! A panic escaping a user callback is caught and discarded at the dispatch
//! boundary; a pool thread never dies from user code.

mod error;
mod pool;
mod work_item;

pub use error::*;
pub use pool::*;
