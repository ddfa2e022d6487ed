// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.
//!
//! Absence of a value is never an error in taskwise; lookups return `Option`.
//! The only error a caller can observe comes from the low-level [`storage`](crate::storage)
//! API when it is used outside of a storage scope.

/// Errors returned by the low-level storage API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The calling task never entered [`with_storage`](crate::with_storage), so it has
    /// no identity and no slot.
    ///
    /// This is recoverable; most callers treat it as "no value".
    #[error("task-local storage is not enabled for this task")]
    NotEnabled,
}

/// Result alias for the low-level storage API.
pub type Result<T> = std::result::Result<T, Error>;
