// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The result for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error from registering work with the pool.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorKind);

/// The kinds of error this crate produces.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// A millisecond argument was below `-1`.
    #[error("parameter '{0}' must be -1 or a non-negative number of milliseconds")]
    NonNegOrNegOne(&'static str),
}

impl Error {
    pub(crate) const fn non_neg_or_neg_one(name: &'static str) -> Self {
        Self(ErrorKind::NonNegOrNegOne(name))
    }

    #[cfg(test)]
    pub(crate) const fn kind(&self) -> &ErrorKind {
        &self.0
    }
}
