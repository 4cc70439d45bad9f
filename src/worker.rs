//! A single thread blocked on the broker, executing one item at a time.
//!
//! Grounded on `examples/original_source/src/worker.cc`/`worker.h`
//! (`worker::start`/`stop`/`entrance_point`) for the lifecycle, and on
//! `examples/fimoengine-fimo/modules/fimo_tasks/src/worker_pool.rs`
//! (`TaskWorker`/`worker_main`) for the Rust-side thread/condvar plumbing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::broker::{Broker, WaiterId};
use crate::Error;

/// One OS thread blocked on a [`Broker`], dispatching items as they arrive.
pub struct Worker {
    broker: Weak<Broker>,
    running: Arc<AtomicBool>,
    ready: Arc<(Mutex<bool>, Condvar)>,
    thread_id: Mutex<Option<ThreadId>>,
    waiter_id: Mutex<Option<WaiterId>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("running", &self.is_running())
            .field("id", &self.id())
            .finish()
    }
}

impl Worker {
    /// Creates an idle worker bound to `broker`. Call [`start`](Worker::start)
    /// to actually spawn its thread.
    pub fn new(broker: Weak<Broker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            running: Arc::new(AtomicBool::new(false)),
            ready: Arc::new((Mutex::new(false), Condvar::new())),
            thread_id: Mutex::new(None),
            waiter_id: Mutex::new(None),
            thread: Mutex::new(None),
        })
    }

    /// Spawns the service thread, if not already running. Blocks the caller
    /// until the thread has recorded its id and is about to enter its
    /// dispatch loop. The thread only occupies a slot in
    /// `broker.waiter_count()` once it actually blocks in a `wait` call, so
    /// that count may lag a beat behind `start` returning (spec.md §4.3: the
    /// pool does not guarantee synchronous waiter registration).
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let this = self.clone();
        let ready = self.ready.clone();
        let build = thread::Builder::new().name("tq-worker".into());
        let handle = build
            .spawn(move || this.run(ready))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                Error::SpawnWorker(e)
            })?;

        {
            let (lock, cond) = &*self.ready;
            let mut ready = lock.lock();
            if !*ready {
                cond.wait(&mut ready);
            }
        }

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    fn run(self: Arc<Self>, ready: Arc<(Mutex<bool>, Condvar)>) {
        let Some(broker) = self.broker.upgrade() else {
            self.signal_ready(&ready);
            self.running.store(false, Ordering::Release);
            return;
        };

        let waiter = broker.register_waiter();
        *self.thread_id.lock() = Some(thread::current().id());
        *self.waiter_id.lock() = Some(waiter);
        self.signal_ready(&ready);

        // Checked before every `wait` call, not just after a broken one: a
        // `stop()` that lands while this thread is off running `item.run()`
        // finds no slot to break (the waiter map only holds threads actually
        // suspended in `wait`), so it is this check, not `break_waiter`, that
        // stops the thread from blocking again.
        while self.running.load(Ordering::Acquire) {
            match broker.wait(waiter) {
                Some(item) => item.run(),
                None => {
                    if !broker.is_open() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
    }

    fn signal_ready(&self, ready: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cond) = &**ready;
        *lock.lock() = true;
        cond.notify_one();
    }

    /// Stops the worker, if running, and blocks until its thread has
    /// exited.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(broker) = self.broker.upgrade() {
            if let Some(waiter) = *self.waiter_id.lock() {
                broker.break_waiter(waiter);
            }
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// `true` while the service thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The service thread's OS thread id, once started.
    pub fn id(&self) -> Option<ThreadId> {
        *self.thread_id.lock()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
