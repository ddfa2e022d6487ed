// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level, single-domain task-local storage.
//!
//! This is the simplest way to use taskwise: wrap the body of a task in
//! [`with_storage`], then [`set`] and [`get`] string-keyed values anywhere beneath it.
//! Unlike a [`ContextManager`](crate::ContextManager), values are not scoped to a
//! callback; they live until the task's outermost storage scope exits.
//!
//! ```
//! use taskwise::{Error, get, set, with_storage};
//!
//! assert_eq!(set("user", 7u32), Err(Error::NotEnabled));
//! with_storage(|| {
//!     set("user", 7u32).unwrap();
//!     assert_eq!(get::<u32>("user").unwrap().as_deref(), Some(&7));
//!     assert!(get::<u32>("missing").unwrap().is_none());
//! });
//! ```

use crate::error::{Error, Result};
use crate::id_pool::TaskId;
use crate::identity::{IdentityGuard, IdentitySource, ThreadIdentity};
use crate::slot_array::SlotArray;
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// A value held in [`Storage`].
pub type Value = Arc<dyn Any + Send + Sync>;

/// A string-keyed slot per task, backed by a [`SlotArray`].
pub struct Storage {
    slots: SlotArray<String, Value>,
    identity: Arc<dyn IdentitySource>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("slots", &self.slots).finish()
    }
}

static GLOBAL_STORAGE: OnceLock<Storage> = OnceLock::new();

/// Vacates the slot when the scope that opened it exits, including by panic.
struct Vacate<'a> {
    slots: &'a SlotArray<String, Value>,
    id: TaskId,
}

impl Drop for Vacate<'_> {
    fn drop(&mut self) {
        self.slots.clear(self.id);
    }
}

impl Storage {
    /// An independent store, with its own slots, using `identity`.
    pub fn new(identity: Arc<dyn IdentitySource>) -> Self {
        Storage {
            slots: SlotArray::new(),
            identity,
        }
    }

    /// The process-wide store used by [`with_storage`], [`set`] and [`get`].
    pub fn global() -> &'static Storage {
        GLOBAL_STORAGE.get_or_init(|| Storage::new(ThreadIdentity::global()))
    }

    /// Enables storage for the calling task for the duration of `f`.
    ///
    /// The outermost storage scope on a task starts from an empty slot and empties it
    /// again on exit; nested scopes share the slot.  Storage scopes nest independently of
    /// [`ContextManager`](crate::ContextManager) scopes, even though both hold the same
    /// task identity.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let identity = IdentityGuard::enter(&*self.identity);
        let id = identity.id();
        self.slots.ensure_capacity(id);
        //a live slot belongs to an enclosing storage scope on this task
        let _vacate = if self.slots.open(id) {
            Some(Vacate {
                slots: &self.slots,
                id,
            })
        } else {
            None
        };
        f()
    }

    fn with_slot<R>(
        &self,
        f: impl FnOnce(&mut std::collections::HashMap<String, Value>) -> R,
    ) -> Result<R> {
        let id = self.identity.current().ok_or(Error::NotEnabled)?;
        self.slots.with_slot(id, f).ok_or(Error::NotEnabled)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        let old = self.with_slot(|slot| slot.insert(key, Arc::new(value) as Value))?;
        drop(old);
        Ok(())
    }

    /// The raw value under `key`.
    pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
        self.with_slot(|slot| slot.get(key).cloned())
    }

    /// The value under `key`, if there is one of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<T>>> {
        Ok(self
            .get_value(key)?
            .and_then(|value| value.downcast::<T>().ok()))
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.with_slot(|slot| slot.remove(key))
    }
}

/// Runs `f` with [`Storage::global`] enabled for the calling thread.
pub fn with_storage<R>(f: impl FnOnce() -> R) -> R {
    Storage::global().scope(f)
}

/// [`Storage::set`] on [`Storage::global`].
pub fn set<T: Any + Send + Sync>(key: impl Into<String>, value: T) -> Result<()> {
    Storage::global().set(key, value)
}

/// [`Storage::get`] on [`Storage::global`].
pub fn get<T: Any + Send + Sync>(key: &str) -> Result<Option<Arc<T>>> {
    Storage::global().get(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_arch = "wasm32")]
    use wasm_bindgen_test::*;

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn not_enabled_outside_scope() {
        assert_eq!(set("a", 1u8), Err(Error::NotEnabled));
        assert_eq!(get::<u8>("a").unwrap_err(), Error::NotEnabled);
        assert_eq!(
            Storage::global().remove("a").unwrap_err(),
            Error::NotEnabled
        );
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn values_live_for_the_scope() {
        with_storage(|| {
            set("name", String::from("alice")).unwrap();
            with_storage(|| {
                //nested scopes share the slot
                assert_eq!(get::<String>("name").unwrap().as_deref().map(String::as_str), Some("alice"));
                set("depth", 2u32).unwrap();
            });
            assert_eq!(get::<u32>("depth").unwrap().as_deref(), Some(&2));
            //wrong type reads as absent
            assert!(get::<u64>("depth").unwrap().is_none());
            assert!(Storage::global().remove("depth").unwrap().is_some());
            assert!(get::<u32>("depth").unwrap().is_none());
        });
        assert_eq!(get::<String>("name").unwrap_err(), Error::NotEnabled);
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn next_scope_starts_clean() {
        with_storage(|| set("left", true).unwrap());
        with_storage(|| assert!(get::<bool>("left").unwrap().is_none()));
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn scope_vacates_on_panic() {
        let r = std::panic::catch_unwind(|| {
            with_storage(|| {
                set("x", 1u8).unwrap();
                panic!("boom");
            })
        });
        assert!(r.is_err());
        assert_eq!(get::<u8>("x").unwrap_err(), Error::NotEnabled);
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn enabled_inside_a_manager_scope() {
        let manager = crate::ContextManager::<&'static str, u32>::with_options(crate::Options {
            identity: None,
            registry: Some(crate::Registry::new()),
        });
        manager.set_value("k", 1, || {
            with_storage(|| {
                assert_eq!(set("a", 5u32), Ok(()));
                assert_eq!(get::<u32>("a").unwrap().as_deref(), Some(&5));
                //the manager's bindings are a separate domain
                assert_eq!(manager.get_value("a"), None);
                assert_eq!(manager.get_value("k"), Some(1));
            });
            assert_eq!(get::<u32>("a").unwrap_err(), Error::NotEnabled);
            assert_eq!(manager.get_value("k"), Some(1));
        });
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn manager_scope_inside_storage() {
        let manager = crate::ContextManager::<&'static str, u32>::with_options(crate::Options {
            identity: None,
            registry: Some(crate::Registry::new()),
        });
        with_storage(|| {
            set("a", 5u32).unwrap();
            manager.set_value("a", 7, || {
                assert_eq!(get::<u32>("a").unwrap().as_deref(), Some(&5));
                assert_eq!(manager.get_value("a"), Some(7));
                set("b", 6u32).unwrap();
            });
            //leaving the manager scope does not touch storage
            assert_eq!(get::<u32>("b").unwrap().as_deref(), Some(&6));
            assert_eq!(manager.get_value("a"), None);
        });
        assert_eq!(get::<u32>("a").unwrap_err(), Error::NotEnabled);
    }

    #[cfg_attr(not(target_arch = "wasm32"), test)]
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
    fn storage_nested_in_a_manager_leaves_no_residue() {
        let manager = crate::ContextManager::<&'static str, u32>::with_options(crate::Options {
            identity: None,
            registry: Some(crate::Registry::new()),
        });
        manager.set_value("k", 1, || {
            with_storage(|| set("left", true).unwrap());
            with_storage(|| assert!(get::<bool>("left").unwrap().is_none()));
        });
        //the identity was released; whoever holds it next starts clean
        with_storage(|| assert!(get::<bool>("left").unwrap().is_none()));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn threads_do_not_share_slots() {
        with_storage(|| {
            set("who", "parent").unwrap();
            let child = std::thread::spawn(|| {
                assert_eq!(get::<&'static str>("who").unwrap_err(), Error::NotEnabled);
                with_storage(|| {
                    assert!(get::<&'static str>("who").unwrap().is_none());
                    set("who", "child").unwrap();
                });
            });
            child.join().unwrap();
            assert_eq!(get::<&'static str>("who").unwrap().as_deref(), Some(&"parent"));
        });
    }
}
