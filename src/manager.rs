// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scoped, shadowable key/value bindings.

use crate::id_pool::TaskId;
use crate::identity::{IdentityGuard, IdentitySource, ThreadIdentity};
use crate::propagate::{Exit, Layer};
use crate::registry::{ManagerId, Propagate, Registry, WeakRegistry};
use crate::spinlock::Spinlock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A set of bindings, as passed to [`ContextManager::set_values`].
pub type Values<K, V> = HashMap<K, V>;

type Slot<K, V> = Arc<Mutex<Values<K, V>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Construction options for a [`ContextManager`].
///
/// The defaults are the ones [`ContextManager::new`] uses: [`ThreadIdentity`] and
/// [`Registry::global`].
#[derive(Clone, Default)]
pub struct Options {
    /// Where the manager learns which task it runs on.
    pub identity: Option<Arc<dyn IdentitySource>>,
    /// The registry the manager joins, and propagates through.
    pub registry: Option<Registry>,
}

/// Task-scoped key/value bindings.
///
/// A manager holds, for every task with bindings, a map from keys to values.
/// [`set_values`](ContextManager::set_values) pushes bindings that are visible to
/// [`get_value`](ContextManager::get_value) everywhere beneath it on the same task, and
/// restores the previous state when it returns or unwinds.
///
/// Managers are independent: the same key in two managers refers to two different
/// bindings.  Typically a manager is created once per class of context variable and
/// lives for the rest of the process.
///
/// Keys must be `Eq + Hash`.  Values are cloned when read and when propagated.
///
/// ```
/// use taskwise::{ContextManager, Values};
///
/// let manager = ContextManager::<&str, String>::new();
/// let log = || match manager.get_value("request") {
///     Some(id) => format!("request {id}"),
///     None => "no request".to_string(),
/// };
///
/// let inside = manager.set_values(Values::from([("request", "123".to_string())]), || log());
/// assert_eq!(inside, "request 123");
/// assert_eq!(log(), "no request");
/// # manager.unregister();
/// ```
pub struct ContextManager<K, V> {
    id: ManagerId,
    slots: Spinlock<HashMap<TaskId, Slot<K, V>>>,
    identity: Arc<dyn IdentitySource>,
    registry: WeakRegistry,
}

impl<K, V> std::fmt::Debug for ContextManager<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("id", &self.id)
            .field("live_slots", &self.slots.with(|s| s.len()))
            .finish()
    }
}

/// Restores a slot when a [`ContextManager::set_values`] scope exits.
struct Scope<'a, K: Eq + Hash, V> {
    manager: &'a ContextManager<K, V>,
    slot: Slot<K, V>,
    /// Each bound key with the value it shadowed, if any.
    undo: Vec<(K, Option<V>)>,
    created: bool,
    id: TaskId,
    //dropped after the slot is restored
    _identity: IdentityGuard<'a>,
}

impl<K: Eq + Hash, V> Drop for Scope<'_, K, V> {
    fn drop(&mut self) {
        if self.created {
            let removed = self.manager.slots.with_mut(|slots| slots.remove(&self.id));
            debug_assert!(removed.is_some_and(|s| Arc::ptr_eq(&s, &self.slot)));
            logwise::trace_sync!(
                "removed slot for task {task} in manager {manager}",
                task = self.id.0,
                manager = self.manager.id.0
            );
            return;
        }
        let mut map = lock(&self.slot);
        for (key, prior) in self.undo.drain(..) {
            match prior {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
    }
}

impl<K, V> ContextManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A manager using [`ThreadIdentity`], registered in [`Registry::global`].
    pub fn new() -> Arc<Self> {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Arc<Self> {
        let registry = options
            .registry
            .unwrap_or_else(|| Registry::global().clone());
        let identity = options.identity.unwrap_or_else(ThreadIdentity::global);
        let manager = Arc::new(ContextManager {
            id: ManagerId::next(),
            slots: Spinlock::new(HashMap::new()),
            identity,
            registry: registry.downgrade(),
        });
        registry.register(manager.id, manager.clone());
        manager
    }

    /// Removes this manager from its registry.
    ///
    /// Its bindings stop propagating to spawned tasks; reads and writes on the calling
    /// task keep working.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }

    #[inline]
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Number of tasks currently holding bindings in this manager.
    pub fn live_slots(&self) -> usize {
        self.slots.with(|s| s.len())
    }

    fn push(&self, values: Values<K, V>) -> Option<Scope<'_, K, V>> {
        if values.is_empty() {
            return None;
        }
        let identity = IdentityGuard::enter(&*self.identity);
        let id = identity.id();
        let (slot, created) = self.slots.with_mut(|slots| match slots.get(&id) {
            Some(slot) => (slot.clone(), false),
            None => {
                let slot = Slot::<K, V>::default();
                slots.insert(id, slot.clone());
                (slot, true)
            }
        });
        let mut undo = Vec::with_capacity(values.len());
        {
            let mut map = lock(&slot);
            for (key, value) in values {
                let prior = map.insert(key.clone(), value);
                undo.push((key, prior));
            }
        }
        let count = undo.len() as u64;
        logwise::trace_sync!(
            "bound {count} keys for task {task} in manager {manager}",
            count = count,
            task = id.0,
            manager = self.id.0
        );
        Some(Scope {
            manager: self,
            slot,
            undo,
            created,
            id,
            _identity: identity,
        })
    }

    /// Runs `f` with `values` bound on the calling task.
    ///
    /// New keys are added and existing keys shadowed for the dynamic extent of `f`,
    /// including nested `set_values` calls.  When `f` returns or unwinds, every key in
    /// `values` goes back to its prior value or absence.  Other tasks, including ones
    /// spawned by `f` without [`spawn`](crate::spawn), never observe these bindings.
    ///
    /// No lock is held while `f` runs.
    pub fn set_values<R>(&self, values: Values<K, V>, f: impl FnOnce() -> R) -> R {
        let _scope = self.push(values);
        f()
    }

    /// [`set_values`](ContextManager::set_values) with a single binding.
    pub fn set_value<R>(&self, key: K, value: V, f: impl FnOnce() -> R) -> R {
        self.set_values(Values::from([(key, value)]), f)
    }

    fn slot(&self) -> Option<Slot<K, V>> {
        let id = self.identity.current()?;
        self.slots.with(|slots| slots.get(&id).cloned())
    }

    /// The value bound to `key` on the calling task, if any.
    pub fn get_value<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.slot()?;
        let map = lock(&slot);
        map.get(key).cloned()
    }

    /// A copy of every binding on the calling task.
    ///
    /// Empty when the task has no identity or no bindings in this manager.
    pub fn get_values(&self) -> Values<K, V> {
        match self.slot() {
            Some(slot) => lock(&slot).clone(),
            None => Values::new(),
        }
    }
}

/// Bindings captured from one manager.
struct Captured<K, V> {
    manager: Arc<ContextManager<K, V>>,
    values: Values<K, V>,
}

impl<K, V> Layer for Captured<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn enter(&self) -> Option<Box<dyn Exit + '_>> {
        self.manager
            .push(self.values.clone())
            .map(|scope| Box::new(scope) as Box<dyn Exit + '_>)
    }
}

impl<K, V> Propagate for ContextManager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn capture(self: Arc<Self>) -> Option<Box<dyn Layer>> {
        let values = self.get_values();
        if values.is_empty() {
            return None;
        }
        Some(Box::new(Captured {
            manager: self,
            values,
        }))
    }
}
