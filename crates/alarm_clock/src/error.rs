// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use sched_primitives::SpawnError;

/// The result for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error from arming a timer or alarm.
///
/// Range violations are rejected before any scheduling state is touched.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorKind);

/// The kinds of error this crate produces.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// A millisecond argument was below `-1`.
    #[error("parameter '{0}' must be -1 or a non-negative number of milliseconds")]
    NonNegOrNegOne(&'static str),

    /// A time-unit argument was negative.
    #[error("parameter '{0}' must be a non-negative number of time units or INFINITE")]
    NonNegative(&'static str),

    /// A period argument was zero or negative.
    #[error("parameter '{0}' must be a positive number of time units or INFINITE")]
    PositiveNonZero(&'static str),

    /// The timer driver thread could not be started.
    #[error("the timer driver thread could not be started: {0}")]
    Driver(#[from] SpawnError),
}

impl Error {
    pub(crate) const fn non_neg_or_neg_one(name: &'static str) -> Self {
        Self(ErrorKind::NonNegOrNegOne(name))
    }

    pub(crate) const fn non_negative(name: &'static str) -> Self {
        Self(ErrorKind::NonNegative(name))
    }

    pub(crate) const fn positive_non_zero(name: &'static str) -> Self {
        Self(ErrorKind::PositiveNonZero(name))
    }

    pub(crate) const fn driver(error: SpawnError) -> Self {
        Self(ErrorKind::Driver(error))
    }

    #[cfg(test)]
    pub(crate) const fn kind(&self) -> &ErrorKind {
        &self.0
    }
}
