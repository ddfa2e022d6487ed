// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform-specific spawn primitive.
//!
//! This is the raw spawn that [`spawn`](crate::spawn) builds on.  On native
//! platforms it is `std::thread::spawn`, while on WASM it comes from `wasm_thread`.
//! Neither propagates any bindings.

#[cfg(not(target_arch = "wasm32"))]
pub use std::thread::{JoinHandle, spawn};
#[cfg(target_arch = "wasm32")]
pub use wasm_thread::{JoinHandle, spawn};
