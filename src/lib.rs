//! A cooperative task-dispatch runtime for in-process background work.
//!
//! Clients acquire [`SerialQueue`]s; each queue accepts closures submitted
//! with [`SerialQueue::post`] (asynchronous) or [`SerialQueue::sync`]
//! (blocking), and the runtime runs them on a shared [`WorkerPool`] of
//! threads blocked on a [`Broker`]. A queue's own tasks always run FIFO and
//! never overlap each other; different queues may run concurrently, limited
//! only by pool size. [`Timer`] schedules tasks onto queues at wall-clock
//! instants.
//!
//! The pieces, leaves first:
//!
//! - [`Broker`]: the thread-safe work channel workers block on.
//! - [`Worker`] / [`WorkerPool`]: threads that dequeue and run items.
//! - [`SerialQueue`]: a per-client FIFO gate feeding its head task into the
//!   broker, one in flight at a time.
//! - [`Timer`]: a process-wide scheduler that posts jobs onto queues.
//! - [`Runtime`]: a process-wide default broker/pool and queue factory, for
//!   callers who don't need an isolated broker/pool pair.
//!
//! No component in this crate ever panics across its public API in steady
//! state: a broken broker or queue just drops submitted work silently. Only
//! construction (spawning an OS thread) can fail, surfaced as [`Error`].

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

mod broker;
mod error;
mod item;
mod location;
mod runtime;
mod serial_queue;
mod timer;
mod worker;
mod worker_pool;

pub use broker::{Broker, ItemHandle};
pub use error::Error;
pub use item::TaskMeta;
pub use location::Location;
pub use runtime::Runtime;
pub use serial_queue::SerialQueue;
pub use timer::Timer;
pub use worker::Worker;
pub use worker_pool::WorkerPool;
