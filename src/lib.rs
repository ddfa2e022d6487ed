//SPDX-License-Identifier: MIT OR Apache-2.0
/*!
# taskwise

taskwise provides implicit, stack-scoped storage for tasks.

# Development status

taskwise is experimental and the API may change.

# The problem

Some values are part of *where* code runs rather than *what* it computes: a request id,
a tenant, a trace span, a locale.  Threading them through every function signature is
noisy, and a `thread_local!` is the wrong shape for them:

* A thread-local is set, not scoped.  Nothing puts the previous value back when a
  nested operation is done with it.
* A thread-local outlives the work that set it, and leaks into whatever the thread runs
  next.
* A thread-local does not follow work into a child thread, even when you want it to.

# The model

A [`ContextManager`] binds values for the dynamic extent of a callback:

```rust
use taskwise::ContextManager;

let manager = ContextManager::<&str, String>::new();

fn my_log(manager: &ContextManager<&'static str, String>) -> String {
    match manager.get_value("request") {
        Some(id) => format!("My request id is: {id}"),
        None => "No request id found".to_string(),
    }
}

manager.set_value("request", "12345".to_string(), || {
    assert_eq!(my_log(&manager), "My request id is: 12345");
    manager.set_value("request", "67890".to_string(), || {
        //inner scopes shadow
        assert_eq!(my_log(&manager), "My request id is: 67890");
    });
    //and put things back when they return
    assert_eq!(my_log(&manager), "My request id is: 12345");
});
assert_eq!(my_log(&manager), "No request id found");
# manager.unregister();
```

Bindings are restored when the callback returns *or* unwinds.  Each manager is its own
namespace; any number of them may coexist.

# Multithreading

Each thread is a task with its own bindings.  A thread spawned with `std::thread::spawn`
starts with none.  A thread spawned with [`spawn`] starts with a copy of every binding of
every registered manager on the spawning thread.  For executors and thread pools, capture
a [`Snapshot`] yourself and run work inside it, or wrap a future in [`ApplyValues`].

# Identities

Under the hood every task that touches taskwise gets a small integer [`TaskId`] from an
[`IdPool`], for as long as it has something bound.  Identities are reused, which keeps
per-task storage dense.  See [`identity`] for plugging in a different notion of "task".

# Low-level storage

For a single, unscoped namespace there is [`with_storage`], [`set`] and [`get`], backed by
a [`SlotArray`] indexed directly by [`TaskId`].

# Logging

taskwise logs through [logwise](https://crates.io/crates/logwise).  Internal
diagnostics (identity and slot bookkeeping) are compiled in with the `logwise_internal`
feature.
*/

mod error;
mod id_pool;
pub mod identity;
mod manager;
mod propagate;
mod registry;
pub mod slot_array;
mod spinlock;
pub mod storage;
mod symbol;
mod sys;

logwise::declare_logging_domain!();

pub use error::{Error, Result};
pub use id_pool::{IdPool, TaskId};
pub use identity::{IdentityGuard, IdentitySource, ThreadIdentity};
pub use manager::{ContextManager, Options, Values};
pub use propagate::{ApplyValues, Snapshot, spawn};
pub use registry::{ManagerId, Registry};
pub use slot_array::SlotArray;
pub use storage::{Storage, get, set, with_storage};
pub use symbol::{Symbol, gensym};
pub use sys::JoinHandle;
