// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Virtual-time alarm multiplexing and the timer facade built on it.
//!
//! - [`AlarmClock`]: a clock that keeps track of time but does not advance it.
//!   Any number of [`Alarm`]s can be armed against it; calling
//!   [`AlarmClock::sleep`] advances the clock's virtual time and fires every
//!   alarm that expires in the covered interval, in expiry order. Because the
//!   clock omits the "what advances time" piece, it can be driven by a
//!   background thread, a message loop, or a test, all with the same
//!   semantics.
//! - [`Timer`]: the public timer type. One process-wide background thread
//!   (see [`TimerContext::global`]) drives a shared `AlarmClock` from wall
//!   time and acknowledges deferred disposals.
//! - [`TimerContext`]: the driver state behind `Timer`. Tests create a
//!   manual context and advance it explicitly instead of waiting on real
//!   time.
//!
//! Time is measured in caller-defined units (the driver uses milliseconds);
//! [`INFINITE`] disables an alarm or makes it one-shot.

mod clock;
mod context;
mod error;
mod timer;

pub use clock::*;
pub use context::*;
pub use error::*;
pub use timer::*;
