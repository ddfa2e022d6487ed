// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovering and assigning task identities.
//!
//! Storage in taskwise is indexed by a small [`TaskId`].  An [`IdentitySource`] answers
//! "which task am I running on" and hands out an identity on first need.  The default
//! source, [`ThreadIdentity`], treats each thread as a task and keeps its identity in a
//! thread-local cell.
//!
//! Identities are scoped: a task holds one only while at least one [`IdentityGuard`] is
//! alive on it.  When the outermost guard drops, the identity goes back to the pool.
//!
//! ```
//! use taskwise::identity::{ThreadIdentity, current_task_id, ensure_task_id};
//!
//! assert_eq!(current_task_id(), None);
//! ensure_task_id(&*ThreadIdentity::global(), |id| {
//!     assert_eq!(current_task_id(), Some(id));
//! });
//! assert_eq!(current_task_id(), None);
//! ```

use crate::id_pool::{IdPool, TaskId};
use std::cell::Cell;
use std::sync::{Arc, OnceLock};

/// Answers which task the caller runs on, assigning identities on demand.
///
/// Implementations must never report the same [`TaskId`] for two tasks that hold it at
/// the same time.  Calls to [`enter`](IdentitySource::enter) and
/// [`leave`](IdentitySource::leave) nest on each task; most code should use
/// [`IdentityGuard`] rather than calling them directly.
pub trait IdentitySource: Send + Sync {
    /// The calling task's identity, if it holds one.
    fn current(&self) -> Option<TaskId>;

    /// Ensures the calling task holds an identity.
    ///
    /// Returns the identity and whether this call assigned it (that is, whether this is
    /// the outermost entry on the task).
    fn enter(&self) -> (TaskId, bool);

    /// Exits one level entered by [`enter`](IdentitySource::enter).
    ///
    /// Leaving the outermost level releases the identity.
    fn leave(&self, id: TaskId);
}

/// Holds the calling task's identity until dropped.
#[must_use]
pub struct IdentityGuard<'a> {
    source: &'a dyn IdentitySource,
    id: TaskId,
    outermost: bool,
}

impl<'a> IdentityGuard<'a> {
    pub fn enter(source: &'a dyn IdentitySource) -> Self {
        let (id, outermost) = source.enter();
        IdentityGuard {
            source,
            id,
            outermost,
        }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether this guard assigned the identity, and will release it on drop.
    #[inline]
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.source.leave(self.id);
    }
}

/// Runs `f` with an identity guaranteed for its duration.
pub fn ensure_task_id<R>(source: &dyn IdentitySource, f: impl FnOnce(TaskId) -> R) -> R {
    let guard = IdentityGuard::enter(source);
    f(guard.id())
}

/// The calling thread's identity under [`ThreadIdentity`], if it holds one.
pub fn current_task_id() -> Option<TaskId> {
    thread_identity().current()
}

#[derive(Copy, Clone)]
struct Held {
    id: TaskId,
    depth: u32,
}

thread_local! {
    static HELD: Cell<Option<Held>> = const { Cell::new(None) };
}

/// Identity source that treats every thread as a task.
///
/// There is one per process, obtained with [`ThreadIdentity::global`].
///
/// A thread that exits without unwinding its guards (for example, one torn down by the
/// platform) never returns its identity to the pool.
///
/// Scopes entered from a thread-local destructor, after this thread's identity cell is
/// gone, each get a fresh identity for their own duration.  [`IdentitySource::current`]
/// reports none there, so bindings made in such a scope are not readable.
#[derive(Debug)]
pub struct ThreadIdentity {
    pool: IdPool,
}

static THREAD_IDENTITY: OnceLock<Arc<ThreadIdentity>> = OnceLock::new();

fn thread_identity() -> &'static Arc<ThreadIdentity> {
    THREAD_IDENTITY.get_or_init(|| {
        Arc::new(ThreadIdentity {
            pool: IdPool::new(),
        })
    })
}

impl ThreadIdentity {
    pub fn global() -> Arc<dyn IdentitySource> {
        thread_identity().clone()
    }
}

impl IdentitySource for ThreadIdentity {
    fn current(&self) -> Option<TaskId> {
        HELD.try_with(|held| held.get().map(|h| h.id))
            .ok()
            .flatten()
    }

    fn enter(&self) -> (TaskId, bool) {
        let entered = HELD.try_with(|held| match held.get() {
            Some(h) => {
                held.set(Some(Held {
                    id: h.id,
                    depth: h.depth + 1,
                }));
                (h.id, false)
            }
            None => {
                let id = self.pool.acquire();
                logwise::debuginternal_sync!("acquired task id {id}", id = id.0);
                held.set(Some(Held { id, depth: 1 }));
                (id, true)
            }
        });
        entered.unwrap_or_else(|_| {
            //thread-local teardown: lend an id that leave() returns directly
            let id = self.pool.acquire();
            logwise::warn_sync!(
                "Lent task id {id} to a thread whose thread-locals are being destroyed.",
                id = id.0
            );
            (id, true)
        })
    }

    fn leave(&self, id: TaskId) {
        let left = HELD.try_with(|held| match held.get() {
            Some(h) if h.depth > 1 => held.set(Some(Held {
                id: h.id,
                depth: h.depth - 1,
            })),
            Some(h) => {
                debug_assert_eq!(h.id, id);
                held.set(None);
                self.pool.release(h.id);
                logwise::debuginternal_sync!("released task id {id}", id = h.id.0);
            }
            None => {
                logwise::warn_sync!(
                    "Tried to leave task id {id}, but this thread holds no identity.",
                    id = id.0
                );
            }
        });
        if left.is_err() {
            self.pool.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::*;

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn nested_guards_share_one_identity() {
        let source = ThreadIdentity::global();
        assert_eq!(source.current(), None);
        let outer = IdentityGuard::enter(&*source);
        assert!(outer.is_outermost());
        {
            let inner = IdentityGuard::enter(&*source);
            assert!(!inner.is_outermost());
            assert_eq!(inner.id(), outer.id());
        }
        assert_eq!(source.current(), Some(outer.id()));
        drop(outer);
        assert_eq!(source.current(), None);
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn identity_released_on_panic() {
        let source = ThreadIdentity::global();
        let r = std::panic::catch_unwind(|| {
            ensure_task_id(&*ThreadIdentity::global(), |_| panic!("boom"));
        });
        assert!(r.is_err());
        assert_eq!(source.current(), None);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn threads_get_distinct_identities() {
        use std::sync::Barrier;
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    ensure_task_id(&*ThreadIdentity::global(), |id| {
                        //hold the identity until every thread has one
                        barrier.wait();
                        id
                    })
                })
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn identity_available_in_thread_local_destructors() {
        use std::sync::mpsc;

        struct OnExit(mpsc::Sender<Option<TaskId>>);
        impl Drop for OnExit {
            fn drop(&mut self) {
                let source = ThreadIdentity::global();
                let seen = ensure_task_id(&*source, Some);
                let _ = self.0.send(seen);
            }
        }
        thread_local! {
            static ON_EXIT: std::cell::RefCell<Option<OnExit>> = const { std::cell::RefCell::new(None) };
        }

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            ON_EXIT.with(|slot| *slot.borrow_mut() = Some(OnExit(tx)));
        })
        .join()
        .unwrap();
        assert!(rx.recv().unwrap().is_some());
    }
}
