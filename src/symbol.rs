// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unique opaque keys.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

static SYMBOL_ID: AtomicU64 = AtomicU64::new(0);

/// A key that compares equal only to itself and its copies.
///
/// Useful as a [`ContextManager`](crate::ContextManager) key when a library wants a
/// binding nobody else can name by accident.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u64);

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A new [`Symbol`], distinct from every other symbol in the process.
///
/// ```
/// let a = taskwise::gensym();
/// let b = taskwise::gensym();
/// assert_ne!(a, b);
/// let copy = a;
/// assert_eq!(a, copy);
/// ```
pub fn gensym() -> Symbol {
    Symbol(SYMBOL_ID.fetch_add(1, Ordering::Relaxed))
}
