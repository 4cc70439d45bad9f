//! The process-wide default [`Broker`]/[`WorkerPool`] and a queue factory.
//!
//! Grounded on `examples/original_source/src/task_queue_manager.h`/`.cc`
//! (`task_queue_manager::default_pool`/`adjust_default_worker_count`), and
//! on the teacher's `examples/fimoengine-fimo/modules/fimo_tasks/src/runtime.rs`
//! for the lazily-initialized, process-wide singleton shape in Rust.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::broker::Broker;
use crate::serial_queue::SerialQueue;
use crate::worker_pool::WorkerPool;

struct DefaultResources {
    broker: Arc<Broker>,
    pool: Arc<WorkerPool>,
}

fn default_pool_size() -> usize {
    num_cpus::get().max(1)
}

fn resources() -> &'static DefaultResources {
    static DEFAULT: OnceLock<DefaultResources> = OnceLock::new();
    DEFAULT.get_or_init(|| {
        let broker = Broker::new();
        let pool = WorkerPool::new(&broker, default_pool_size())
            .expect("failed to start the default worker pool");
        DefaultResources { broker, pool }
    })
}

/// Serializes calls to [`Runtime::set_default_pool_size`] so concurrent
/// resizes don't race each other to an inconsistent worker count.
fn resize_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// A process-wide default [`Broker`] and [`WorkerPool`], and a factory for
/// [`SerialQueue`]s bound to them.
///
/// Both are constructed lazily on first use and live for the remainder of
/// the process; there is no API to tear them down early; see
/// `examples/original_source/src/task_queue_manager.cc`'s
/// `instance()`-on-first-use default pool, which this mirrors.
#[derive(Debug)]
pub struct Runtime;

impl Runtime {
    /// Creates a serial queue bound to the process-wide default broker and
    /// pool.
    pub fn create_serial_queue() -> Arc<SerialQueue> {
        let defaults = resources();
        SerialQueue::new(&defaults.broker, &defaults.pool)
    }

    /// Creates a serial queue bound to caller-supplied `broker`/`pool`,
    /// for callers who want an isolated broker/pool pair (e.g. tests that
    /// must not share state with the process default).
    pub fn create_serial_queue_with(
        broker: &Arc<Broker>,
        pool: &Arc<WorkerPool>,
    ) -> Arc<SerialQueue> {
        SerialQueue::new(broker, pool)
    }

    /// Adjusts the default pool to exactly `n` workers, growing or shrinking
    /// it by repeated [`WorkerPool::increase`]/[`WorkerPool::decrease`].
    ///
    /// A worker that fails to spawn partway through a grow leaves the pool
    /// at whatever size it reached; the failure is silently absorbed here
    /// because this is steady-state resizing, not construction (see
    /// `spec.md` §7). Use [`WorkerPool::increase`] directly if you need to
    /// observe spawn failures.
    pub fn set_default_pool_size(n: usize) {
        let _guard = resize_lock().lock();
        let pool = &resources().pool;
        while pool.size() < n {
            if pool.increase().is_err() {
                break;
            }
        }
        while pool.size() > n {
            pool.decrease();
        }
    }

    /// Current size of the default pool.
    pub fn default_pool_size() -> usize {
        resources().pool.size()
    }

    /// The process-wide default broker's current pending-item count, for
    /// diagnostics.
    pub fn default_broker_pending_count() -> usize {
        resources().broker.pending_count()
    }
}
