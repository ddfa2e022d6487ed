// SPDX-License-Identifier: MIT OR Apache-2.0

//! A growable array of per-task slots, indexed by [`TaskId`].

use crate::id_pool::TaskId;
use crate::spinlock::Spinlock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of slots a [`SlotArray::new`] starts with.
pub const INITIAL_CAPACITY: usize = 1024;
/// Growth granularity of a [`SlotArray::new`].
pub const CHUNK_SIZE: usize = 128;

/// One key/value map per live task.
///
/// A slot is either *live* (the task entered a storage scope and [`reset`](SlotArray::reset)
/// gave it a fresh map) or *vacant*.  Growth takes the write side of the array lock; every
/// other operation takes the read side and then the slot's own lock, which only the
/// owning task ever contends for.
///
/// Callers must [`ensure_capacity`](SlotArray::ensure_capacity) before using an index.
/// Operations on an index beyond the capacity do nothing and report absence.
pub struct SlotArray<K, V> {
    slots: Spinlock<Vec<Mutex<Option<HashMap<K, V>>>>>,
    chunk: usize,
}

impl<K, V> std::fmt::Debug for SlotArray<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArray")
            .field("capacity", &self.slots.with(|slots| slots.len()))
            .field("chunk", &self.chunk)
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn vacant<K, V>(n: usize) -> impl Iterator<Item = Mutex<Option<HashMap<K, V>>>> {
    (0..n).map(|_| Mutex::new(None))
}

impl<K: Eq + Hash, V> Default for SlotArray<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> SlotArray<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY, CHUNK_SIZE)
    }

    /// An array growing in steps of `chunk`.
    ///
    /// `initial` is rounded up to a multiple of `chunk`.  A `chunk` of zero is treated as one.
    pub fn with_capacity(initial: usize, chunk: usize) -> Self {
        let chunk = chunk.max(1);
        let initial = initial.div_ceil(chunk) * chunk;
        SlotArray {
            slots: Spinlock::new(vacant(initial).collect()),
            chunk,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.with(|slots| slots.len())
    }

    /// Grows the array so `id` is a valid index.
    ///
    /// The new capacity is the smallest multiple of the chunk size greater than `id`.
    pub fn ensure_capacity(&self, id: TaskId) {
        let index = id.index();
        if self.slots.with(|slots| index < slots.len()) {
            return;
        }
        let mut slots = self.slots.write();
        //another task may have grown the array while we waited
        let capacity = slots.len();
        if index >= capacity {
            let grow = ((index - capacity) / self.chunk + 1) * self.chunk;
            slots.extend(vacant(grow));
            let old = capacity as u64;
            let new = slots.len() as u64;
            logwise::debuginternal_sync!("grew slot array from {old} to {new}", old = old, new = new);
        }
    }

    /// Gives `id` a fresh, empty map, discarding whatever a previous holder left.
    ///
    /// Returns false if `id` is beyond the capacity.
    pub fn reset(&self, id: TaskId) -> bool {
        let old = self.slots.with(|slots| {
            let slot = slots.get(id.index())?;
            Some(lock(slot).replace(HashMap::new()))
        });
        match old {
            Some(old) => {
                //user values drop outside of the array lock
                drop(old);
                true
            }
            None => false,
        }
    }

    /// Makes `id` live if it is vacant.
    ///
    /// Returns true if this call made the slot live, in which case the caller owns it and
    /// must [`clear`](SlotArray::clear) it when done.  Returns false if the slot was
    /// already live or `id` is beyond the capacity.
    pub fn open(&self, id: TaskId) -> bool {
        self.slots.with(|slots| match slots.get(id.index()) {
            Some(slot) => {
                let mut guard = lock(slot);
                if guard.is_some() {
                    false
                } else {
                    *guard = Some(HashMap::new());
                    true
                }
            }
            None => false,
        })
    }

    /// Makes `id` vacant again, dropping its values.
    pub fn clear(&self, id: TaskId) {
        let old = self
            .slots
            .with(|slots| slots.get(id.index()).and_then(|slot| lock(slot).take()));
        //user values drop outside of the array lock
        drop(old);
    }

    /// Runs `f` on the live map at `id`.
    ///
    /// Returns `None` if the slot is vacant or `id` is beyond the capacity.
    pub fn with_slot<R>(&self, id: TaskId, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> Option<R> {
        self.slots.with(|slots| {
            let slot = slots.get(id.index())?;
            let mut guard = lock(slot);
            guard.as_mut().map(f)
        })
    }
}
