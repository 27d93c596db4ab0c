#![warn(clippy::perf)]
#![allow(clippy::type_complexity)]
#![doc = include_str!("../README.md")]

#[macro_use]
extern crate log;

pub mod adapters;

mod event;
mod graph;
mod index;
mod ops;
mod sched;

pub use event::*;
pub use graph::*;
pub use index::*;
pub use ops::*;
pub use sched::*;

/// Poison-tolerant mutex access: an operator that panicked mid-update
/// must not take the rest of the graph down with it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
