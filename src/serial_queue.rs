//! A per-client FIFO gate onto a shared [`Broker`]: at most one of its tasks
//! is ever in flight at a time.
//!
//! Grounded on `examples/original_source/src/task_queue.h`/`.cc`
//! (`task_queue::post_task`/`sync_task`/`cancel`/`break_queue`, and the
//! local `movable_flag`/`state_semaphore` one-shot latch `sync_task` waits
//! on).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::broker::Broker;
use crate::item::{Item, Payload};
use crate::worker_pool::WorkerPool;
use crate::Location;

struct QueuedTask {
    location: Location,
    payload: Payload,
}

struct State {
    pending: VecDeque<QueuedTask>,
    running: bool,
}

/// A FIFO queue of closures that runs them one at a time on the shared
/// worker pool, preserving submission order.
///
/// Unlike posting straight to a [`Broker`], a `SerialQueue` guarantees its
/// tasks never overlap with each other, even though they may run on
/// different worker threads over time. See `spec.md` §4.2.
pub struct SerialQueue {
    broker: Weak<Broker>,
    pool: Weak<WorkerPool>,
    self_weak: Weak<SerialQueue>,
    state: Mutex<State>,
    open: AtomicBool,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SerialQueue")
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("open", &self.open.load(Ordering::Acquire))
            .finish()
    }
}

impl SerialQueue {
    /// Creates an empty, open queue that dispatches onto `pool` through
    /// `broker`.
    pub fn new(broker: &Arc<Broker>, pool: &Arc<WorkerPool>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            broker: Arc::downgrade(broker),
            pool: Arc::downgrade(pool),
            self_weak: weak.clone(),
            state: Mutex::new(State {
                pending: VecDeque::new(),
                running: false,
            }),
            open: AtomicBool::new(true),
        })
    }

    /// Appends `payload` to the queue. Runs after every task already
    /// queued, and before any task queued after it. A no-op once the queue
    /// has been broken.
    pub fn post(&self, location: Location, payload: impl FnOnce() + Send + 'static) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        let task = QueuedTask {
            location,
            payload: Box::new(payload),
        };
        let mut state = self.state.lock();
        state.pending.push_back(task);
        if state.running {
            return;
        }
        state.running = true;
        let next = state.pending.pop_front().expect("just pushed");
        drop(state);
        self.dispatch(next);
    }

    /// Runs `payload` and blocks the caller until it completes, preserving
    /// this queue's FIFO ordering relative to other posted work.
    ///
    /// If the calling thread is the pool's only worker, runs `payload`
    /// inline instead of posting it, to avoid a single-worker deadlock.
    pub fn sync(&self, location: Location, payload: impl FnOnce() + Send + 'static) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            if pool.size() == 1 && pool.in_pool() {
                payload();
                return;
            }
        }
        let flag = MovableFlag::new();
        let state = flag.state();
        self.post(location, move || {
            let _flag = flag;
            payload();
        });
        state.wait();
    }

    /// Drops every not-yet-dispatched task. A task already handed to the
    /// broker keeps running to completion.
    pub fn cancel(&self) {
        self.state.lock().pending.clear();
    }

    /// Permanently stops accepting new tasks. Tasks already queued or
    /// in flight are unaffected; once the in-flight chain drains, no more
    /// ever dispatch.
    pub fn break_queue(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// `true` until [`break_queue`](SerialQueue::break_queue) runs.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Number of tasks queued but not yet dispatched to the broker.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn dispatch(&self, task: QueuedTask) {
        let Some(broker) = self.broker.upgrade() else {
            self.state.lock().running = false;
            return;
        };
        let self_weak = self.self_weak.clone();
        let item = Item::new(task.location, task.payload).with_after(Box::new(move |_meta| {
            if let Some(queue) = self_weak.upgrade() {
                queue.on_task_done();
            }
        }));
        broker.push_back(item);
    }

    fn on_task_done(&self) {
        let next = {
            let mut state = self.state.lock();
            match state.pending.pop_front() {
                Some(task) => Some(task),
                None => {
                    state.running = false;
                    None
                }
            }
        };
        if let Some(task) = next {
            self.dispatch(task);
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.break_queue();
    }
}

struct LatchState {
    done: Mutex<bool>,
    cond: Condvar,
}

impl LatchState {
    fn notify(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait(&mut done);
        }
    }
}

/// A one-shot latch that signals when dropped, so [`SerialQueue::sync`]
/// unblocks even if the wrapped task is cancelled or abandoned before it
/// ever runs.
struct MovableFlag(Arc<LatchState>);

impl MovableFlag {
    fn new() -> Self {
        Self(Arc::new(LatchState {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }))
    }

    fn state(&self) -> Arc<LatchState> {
        self.0.clone()
    }
}

impl Drop for MovableFlag {
    fn drop(&mut self) {
        self.0.notify();
    }
}
