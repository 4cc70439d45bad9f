//! A resizable group of [`Worker`]s sharing one [`Broker`].
//!
//! Grounded on `examples/original_source/src/worker_group.h`/`.cc`
//! (`worker_group::increase_worker`/`decrease_worker`/`in_worker_grouop`)
//! for the shape, adapted to Rust ownership: workers are torn down
//! explicitly on `decrease`/`Drop` rather than relying on `shared_ptr`
//! refcounting.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::broker::Broker;
use crate::worker::Worker;
use crate::Error;

/// An elastic pool of OS threads, all blocked on the same [`Broker`].
///
/// Construction starts `initial_count` workers; [`increase`](WorkerPool::increase)
/// and [`decrease`](WorkerPool::decrease) adjust the pool at runtime. Dropping
/// the pool stops every worker before releasing its reference to the broker.
pub struct WorkerPool {
    broker: Weak<Broker>,
    workers: Mutex<Vec<Arc<Worker>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .finish()
    }
}

impl WorkerPool {
    /// Starts a pool of `initial_count` workers bound to `broker`.
    ///
    /// If a worker thread fails to spawn partway through, the workers
    /// started so far are stopped and the error is returned.
    pub fn new(broker: &Arc<Broker>, initial_count: usize) -> Result<Arc<Self>, Error> {
        let pool = Arc::new(Self {
            broker: Arc::downgrade(broker),
            workers: Mutex::new(Vec::with_capacity(initial_count)),
        });
        for _ in 0..initial_count {
            pool.increase()?;
        }
        Ok(pool)
    }

    /// Current number of workers in the pool.
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// `true` if the calling thread is one of this pool's workers.
    pub fn in_pool(&self) -> bool {
        let current = std::thread::current().id();
        self.workers
            .lock()
            .iter()
            .any(|w| w.id() == Some(current))
    }

    /// Starts one more worker and adds it to the pool.
    pub fn increase(&self) -> Result<(), Error> {
        let worker = Worker::new(self.broker.clone());
        worker.start()?;
        self.workers.lock().push(worker);
        Ok(())
    }

    /// Stops and removes one worker, if the pool isn't already empty.
    ///
    /// Stops whichever worker happens to be last in the internal list; the
    /// pool makes no guarantee about which physical thread that is.
    pub fn decrease(&self) {
        let worker = self.workers.lock().pop();
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in &workers {
            worker.stop();
        }
    }
}
