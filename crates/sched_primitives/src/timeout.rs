// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

/// Error produced when a millisecond timeout value is less than `-1`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("timeout must be -1 (infinite) or a non-negative number of milliseconds")]
pub struct InvalidTimeout;

/// A bound on how long a blocking operation may wait.
///
/// Every blocking call in the coordination layer takes a `Timeout`. The value
/// is either a finite duration or [`Timeout::INFINITE`], which corresponds to
/// the conventional `-1` millisecond sentinel accepted by
/// [`Timeout::try_from_millis`].
///
/// # Examples
///
/// ```
/// use sched_primitives::Timeout;
///
/// assert_eq!(Timeout::try_from_millis(-1)?, Timeout::INFINITE);
/// assert_eq!(Timeout::try_from_millis(250)?, Timeout::from_millis(250));
/// assert!(Timeout::try_from_millis(-2).is_err());
///
/// # Ok::<(), sched_primitives::InvalidTimeout>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(Option<Duration>);

impl Timeout {
    /// Wait forever.
    pub const INFINITE: Self = Self(None);

    /// A finite timeout of `ms` milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(Some(Duration::from_millis(ms)))
    }

    /// A finite timeout of the given duration.
    #[must_use]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(Some(duration))
    }

    /// Converts a signed millisecond value, treating `-1` as infinite.
    ///
    /// Values below `-1` are rejected before any state is touched.
    pub fn try_from_millis(ms: i64) -> Result<Self, InvalidTimeout> {
        match u64::try_from(ms) {
            Ok(ms) => Ok(Self::from_millis(ms)),
            Err(_) if ms == -1 => Ok(Self::INFINITE),
            Err(_) => Err(InvalidTimeout),
        }
    }

    /// Whether this timeout never expires.
    #[must_use]
    pub const fn is_infinite(&self) -> bool {
        self.0.is_none()
    }

    /// The absolute deadline for a wait starting now, or `None` when infinite.
    ///
    /// A finite duration too large to represent as an [`Instant`] is treated
    /// as infinite.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.0.and_then(|d| Instant::now().checked_add(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Timeout: Send, Sync, Copy);
    }

    #[test]
    fn try_from_millis_sentinel() {
        assert_eq!(Timeout::try_from_millis(-1).unwrap(), Timeout::INFINITE);
        assert!(Timeout::try_from_millis(-1).unwrap().is_infinite());
    }

    #[test]
    fn try_from_millis_finite() {
        let timeout = Timeout::try_from_millis(100).unwrap();
        assert_eq!(timeout, Timeout::from_millis(100));
        assert!(!timeout.is_infinite());
    }

    #[test]
    fn try_from_millis_rejects_below_negative_one() {
        assert_eq!(Timeout::try_from_millis(-2), Err(InvalidTimeout));
        assert_eq!(Timeout::try_from_millis(i64::MIN), Err(InvalidTimeout));
    }

    #[test]
    fn deadline_finite_is_in_the_future() {
        let before = Instant::now();
        let deadline = Timeout::from_millis(50).deadline().unwrap();
        assert!(deadline >= before);
    }

    #[test]
    fn deadline_infinite_is_none() {
        assert!(Timeout::INFINITE.deadline().is_none());
    }

    #[test]
    fn error_names_the_contract() {
        assert_eq!(
            InvalidTimeout.to_string(),
            "timeout must be -1 (infinite) or a non-negative number of milliseconds"
        );
    }
}
