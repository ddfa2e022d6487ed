// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small, reusable task identities.
//!
//! The pool keeps identities as small and dense as it can, so that per-task storage
//! can live in a flat array indexed by [`TaskId`] rather than a hash table keyed by
//! some opaque runtime handle.

use crossbeam::queue::SegQueue;
use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier for a live task.
///
/// Unique among the tasks that currently hold one.  Once a task releases its id,
/// the pool may hand the same value to another task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    /// The identity as an array index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pool of [`TaskId`]s.
///
/// Released ids are reused before new ones are minted.  Neither operation blocks.
///
/// ```
/// use taskwise::IdPool;
///
/// let pool = IdPool::new();
/// let a = pool.acquire();
/// let b = pool.acquire();
/// assert_ne!(a, b);
/// pool.release(a);
/// assert_eq!(pool.acquire(), a);
/// ```
#[derive(Debug, Default)]
pub struct IdPool {
    released: SegQueue<TaskId>,
    next: AtomicU32,
}

impl IdPool {
    pub fn new() -> Self {
        IdPool {
            released: SegQueue::new(),
            next: AtomicU32::new(0),
        }
    }

    /// Takes an id that no other live holder has.
    pub fn acquire(&self) -> TaskId {
        match self.released.pop() {
            Some(id) => id,
            None => TaskId(self.next.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Returns `id` to the pool.
    ///
    /// The caller must not use `id` again until a later [`acquire`](IdPool::acquire)
    /// hands it back.  Releasing an id that is not held is not detected.
    pub fn release(&self, id: TaskId) {
        self.released.push(id);
    }

    /// Number of distinct ids minted so far.
    pub fn high_water(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}
