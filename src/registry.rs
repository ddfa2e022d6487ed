// SPDX-License-Identifier: MIT OR Apache-2.0

//! The set of live context managers.
//!
//! Every [`ContextManager`](crate::ContextManager) registers itself at construction.
//! Registration is what lets [`spawn`](crate::spawn) and [`Snapshot::capture`] find every
//! manager with bindings on the calling task without the caller naming them.
//!
//! Most programs only ever use [`Registry::global`].  Independent registries are useful
//! for tests and for libraries that want to propagate only their own managers.

use crate::propagate::{Layer, Snapshot};
use crate::spinlock::Spinlock;
use crate::sys;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static MANAGER_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a [`ContextManager`](crate::ContextManager).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerId(pub(crate) u64);

impl ManagerId {
    pub(crate) fn next() -> Self {
        ManagerId(MANAGER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ManagerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered manager, seen without its key and value types.
pub(crate) trait Propagate: Send + Sync {
    /// Captures the calling task's bindings, if it has any.
    fn capture(self: Arc<Self>) -> Option<Box<dyn Layer>>;
}

pub(crate) struct RegistryInner {
    managers: Spinlock<BTreeMap<ManagerId, Arc<dyn Propagate>>>,
}

/// A set of [`ContextManager`](crate::ContextManager)s whose bindings propagate together.
///
/// `Registry` is a cheap handle; clones refer to the same set.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<ManagerId> = self.inner.managers.with(|m| m.keys().copied().collect());
        f.debug_struct("Registry").field("managers", &ids).finish()
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Registry {}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// A new, empty registry.
    pub fn new() -> Self {
        Registry {
            inner: Arc::new(RegistryInner {
                managers: Spinlock::new(BTreeMap::new()),
            }),
        }
    }

    /// The process-wide registry.
    ///
    /// [`ContextManager::new`](crate::ContextManager::new) registers here, and
    /// [`spawn`](crate::spawn) propagates from here.
    pub fn global() -> &'static Registry {
        GLOBAL_REGISTRY.get_or_init(Registry::new)
    }

    pub fn len(&self) -> usize {
        self.inner.managers.with(|m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ManagerId) -> bool {
        self.inner.managers.with(|m| m.contains_key(&id))
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    pub(crate) fn register(&self, id: ManagerId, manager: Arc<dyn Propagate>) {
        self.inner.managers.with_mut(|m| m.insert(id, manager));
        logwise::debuginternal_sync!("registered context manager {id}", id = id.0);
    }

    pub(crate) fn unregister(&self, id: ManagerId) {
        let removed = self.inner.managers.with_mut(|m| m.remove(&id));
        match removed {
            Some(_) => {
                logwise::debuginternal_sync!("unregistered context manager {id}", id = id.0);
            }
            None => {
                logwise::warn_sync!(
                    "Tried to unregister context manager {id}, but it is not registered.",
                    id = id.0
                );
            }
        }
    }

    /// Captures the calling task's bindings in every manager of this registry.
    pub fn snapshot(&self) -> Snapshot {
        //capture outside of our lock; each capture takes its manager's lock
        let managers: Vec<Arc<dyn Propagate>> =
            self.inner.managers.with(|m| m.values().cloned().collect());
        Snapshot::from_layers(
            managers
                .into_iter()
                .filter_map(|manager| manager.capture())
                .collect(),
        )
    }

    /// Spawns `f` on a new thread that starts with the calling task's bindings in every
    /// manager of this registry.
    pub fn spawn<F, R>(&self, f: F) -> sys::JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let snapshot = self.snapshot();
        let layers = snapshot.len() as u64;
        logwise::trace_sync!("spawning with {layers} propagated managers", layers = layers);
        sys::spawn(snapshot.wrap(f))
    }
}

/// Non-owning reference from a manager back to its registry.
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<Registry> {
        self.0.upgrade().map(|inner| Registry { inner })
    }
}
