// SPDX-License-Identifier: MIT OR Apache-2.0

//! Carrying bindings into new tasks.
//!
//! A freshly spawned thread starts with no bindings at all.  To let it inherit the
//! spawning task's bindings, capture a [`Snapshot`] on the spawning side and run the new
//! task's body inside it.  [`spawn`] does both.
//!
//! A snapshot is a point-in-time copy: bindings changed afterwards, on either side, do
//! not cross over.
//!
//! ```
//! use taskwise::ContextManager;
//!
//! let manager = ContextManager::<&str, u32>::new();
//! manager.set_value("user", 7, || {
//!     let plain = std::thread::spawn({
//!         let manager = manager.clone();
//!         move || manager.get_value("user")
//!     });
//!     assert_eq!(plain.join().unwrap(), None);
//!
//!     let propagated = taskwise::spawn({
//!         let manager = manager.clone();
//!         move || manager.get_value("user")
//!     });
//!     assert_eq!(propagated.join().unwrap(), Some(7));
//! });
//! # manager.unregister();
//! ```

use crate::registry::Registry;
use crate::sys;
use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

/// Something held for the duration of an entered layer.
pub(crate) trait Exit {}
impl<T> Exit for T {}

/// Captured bindings of one manager.
pub(crate) trait Layer: Send + Sync {
    /// Binds the captured values on the calling task until the result drops.
    fn enter(&self) -> Option<Box<dyn Exit + '_>>;
}

/// Bindings captured from every manager of a [`Registry`].
///
/// Obtain one with [`Snapshot::capture`] or [`Registry::snapshot`].
pub struct Snapshot {
    layers: Vec<Box<dyn Layer>>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Exits entered layers in reverse order.
struct Entered<'a>(Vec<Box<dyn Exit + 'a>>);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        while self.0.pop().is_some() {}
    }
}

impl Snapshot {
    pub(crate) fn from_layers(layers: Vec<Box<dyn Layer>>) -> Self {
        Snapshot { layers }
    }

    /// Captures the calling task's bindings in every manager of [`Registry::global`].
    pub fn capture() -> Self {
        Registry::global().snapshot()
    }

    /// Number of managers with captured bindings.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `f` with the captured bindings in place on the calling task.
    ///
    /// Like [`ContextManager::set_values`](crate::ContextManager::set_values), the bindings
    /// are restored when `f` returns or unwinds.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _entered = Entered(self.layers.iter().filter_map(|l| l.enter()).collect());
        f()
    }

    /// Wraps `f` so it runs inside this snapshot, wherever it is eventually called.
    pub fn wrap<F, R>(self, f: F) -> impl FnOnce() -> R + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
        R: 'static,
    {
        move || self.run(f)
    }

    /// Wraps `future` so every poll runs inside this snapshot.
    pub fn apply<F: Future>(self, future: F) -> ApplyValues<F> {
        ApplyValues::new(self, future)
    }
}

/// Spawns `f` on a new thread that starts with the calling task's bindings.
///
/// This is [`Registry::spawn`] on [`Registry::global`].  Use `std::thread::spawn`
/// directly for a thread that should start clean.
pub fn spawn<F, R>(f: F) -> sys::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Registry::global().spawn(f)
}

/// A [`Future`] wrapper that carries bindings across executor boundaries.
///
/// Executors poll futures on whatever thread is available, so bindings set around a
/// spawn call are normally lost.  `ApplyValues` enters its [`Snapshot`] around each
/// poll of the inner future and leaves it again before returning.
///
/// ```
/// use std::future::Future;
/// use std::task::{Context, Poll, Waker};
/// use taskwise::{ContextManager, Snapshot};
///
/// let manager = ContextManager::<&str, u32>::new();
/// let future = manager.set_value("attempt", 2, || {
///     let manager = manager.clone();
///     Snapshot::capture().apply(async move { manager.get_value("attempt") })
/// });
/// //polled later, outside of the scope that set the value
/// let mut future = std::pin::pin!(future);
/// let mut cx = Context::from_waker(Waker::noop());
/// assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(Some(2)));
/// # manager.unregister();
/// ```
pub struct ApplyValues<F> {
    snapshot: Snapshot,
    future: F,
}

impl<F> ApplyValues<F> {
    pub fn new(snapshot: Snapshot, future: F) -> Self {
        ApplyValues { snapshot, future }
    }
}

impl<F> Future for ApplyValues<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `future` is structurally pinned; we never move it out of `self`
        let (snapshot, future) = unsafe {
            let d = self.get_unchecked_mut();
            (&d.snapshot, Pin::new_unchecked(&mut d.future))
        };
        snapshot.run(|| future.poll(cx))
    }
}
