//! The shared, thread-safe work channel connecting serial queues to workers.
//!
//! Grounded on `examples/original_source/src/event_queue.h` (the
//! `event_queue<task>` this module distills) and, for the
//! mutex/condvar/wake-predicate shape in Rust, on
//! `examples/fimoengine-fimo/modules/fimo_tasks/src/worker_pool.rs`
//! (`TaskWorker::tasks_available`, a `parking_lot::Condvar` per wait point).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::item::Item;

/// Identifies one thread currently suspended inside [`Broker::wait`] or
/// [`Broker::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// A non-owning handle to a still-possibly-queued item, returned by
/// [`Broker::push_back`]/[`Broker::push_front`] and usable with
/// [`Broker::cancel`].
///
/// A handle returned while the broker is broken is "dead": it never
/// matches a real item and [`Broker::cancel`] on it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHandle {
    id: u64,
}

impl ItemHandle {
    const fn dead() -> Self {
        Self { id: 0 }
    }
}

struct State {
    items: VecDeque<Item>,
    waiters: HashMap<WaiterId, Arc<AtomicBool>>,
    open: bool,
}

/// A mutex-protected, cancellable work channel with per-waiter wake-up.
///
/// Multiple [`Worker`](crate::Worker)s block in [`wait`](Broker::wait) on a
/// shared `Broker`; [`SerialQueue`](crate::SerialQueue)s push their head
/// task into it. See `spec.md` §4.1 for the full contract. Every mutating
/// operation is total: submissions after the broker is broken are silent
/// no-ops, never panics.
pub struct Broker {
    state: Mutex<State>,
    cond: Condvar,
    next_item_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Broker")
            .field("pending", &state.items.len())
            .field("waiters", &state.waiters.len())
            .field("open", &state.open)
            .finish()
    }
}

impl Broker {
    /// Creates a new, open broker with no waiters and no pending items.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                waiters: HashMap::new(),
                open: true,
            }),
            cond: Condvar::new(),
            next_item_id: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
        })
    }

    /// Allocates a waiter identity for a worker thread's lifetime. Does not
    /// itself count toward [`waiter_count`](Broker::waiter_count); the
    /// returned id only occupies a slot in the waiter map while a
    /// [`wait`](Broker::wait)/[`wait_for`](Broker::wait_for) call is
    /// actually blocked on it.
    pub(crate) fn register_waiter(&self) -> WaiterId {
        WaiterId(self.next_waiter_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends `item` to the back and wakes one waiter.
    pub(crate) fn push_back(&self, item: Item) -> ItemHandle {
        self.push(item, true)
    }

    /// As [`push_back`](Broker::push_back), but inserted at the front.
    pub(crate) fn push_front(&self, item: Item) -> ItemHandle {
        self.push(item, false)
    }

    fn push(&self, mut item: Item, back: bool) -> ItemHandle {
        let mut state = self.state.lock();
        if !state.open {
            return ItemHandle::dead();
        }
        let id = self.next_item_id.fetch_add(1, Ordering::Relaxed);
        item.id = id;
        if back {
            state.items.push_back(item);
        } else {
            state.items.push_front(item);
        }
        drop(state);
        self.cond.notify_one();
        ItemHandle { id }
    }

    /// Blocks until an item is available for this waiter, this waiter is
    /// individually broken, or the broker itself is broken.
    ///
    /// `waiter` occupies a slot in the waiter map (and so counts toward
    /// [`waiter_count`](Broker::waiter_count)) only for the duration of this
    /// call: the slot is created fresh on entry and erased again before
    /// returning, on every return path. A caller that runs a dequeued item
    /// and then calls `wait` again with the same id gets a brand new slot,
    /// live regardless of whether a previous call's slot was broken.
    pub(crate) fn wait(&self, waiter: WaiterId) -> Option<Item> {
        let mut state = self.state.lock();
        state.waiters.insert(waiter, Arc::new(AtomicBool::new(true)));
        loop {
            if let Some(item) = self.take_ready(&mut state, waiter) {
                return item;
            }
            self.cond.wait(&mut state);
        }
    }

    /// As [`wait`](Broker::wait), honoring `timeout` even if the broker
    /// stays empty and silent for the whole duration.
    pub(crate) fn wait_for(&self, waiter: WaiterId, timeout: Duration) -> Option<Item> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.waiters.insert(waiter, Arc::new(AtomicBool::new(true)));
        loop {
            if let Some(item) = self.take_ready(&mut state, waiter) {
                return item;
            }
            let now = Instant::now();
            if now >= deadline {
                state.waiters.remove(&waiter);
                return None;
            }
            self.cond.wait_for(&mut state, deadline - now);
        }
    }

    /// Returns `Some(result)` once this waiter should stop blocking:
    /// `Some(Some(item))` on a dequeue, `Some(None)` on a break. `None`
    /// means "still nothing to do, keep waiting". Every `Some(_)` path
    /// erases the waiter's slot before returning it, since the caller is no
    /// longer suspended once this returns control.
    fn take_ready(&self, state: &mut State, waiter: WaiterId) -> Option<Option<Item>> {
        let live = match state.waiters.get(&waiter) {
            Some(flag) => flag.load(Ordering::Acquire),
            None => false,
        };
        if !state.open || !live {
            state.waiters.remove(&waiter);
            return Some(None);
        }
        if let Some(item) = state.items.pop_front() {
            state.waiters.remove(&waiter);
            return Some(Some(item));
        }
        None
    }

    /// If the referenced item is still queued, removes it.
    pub fn cancel(&self, handle: ItemHandle) -> bool {
        if handle.id == 0 {
            return false;
        }
        let mut state = self.state.lock();
        if let Some(pos) = state.items.iter().position(|it| it.id == handle.id) {
            state.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Drops all queued items. Does not wake waiters; they keep waiting for
    /// future work.
    pub fn cancel_all(&self) {
        self.state.lock().items.clear();
    }

    /// Marks the identified waiter's live flag false and wakes everyone;
    /// only the targeted waiter returns `None` because of it. A no-op if
    /// `waiter` isn't currently blocked in [`wait`](Broker::wait)/
    /// [`wait_for`](Broker::wait_for) — there is no slot to mark.
    pub(crate) fn break_waiter(&self, waiter: WaiterId) {
        let mut state = self.state.lock();
        match state.waiters.get(&waiter) {
            Some(flag) => flag.store(false, Ordering::Release),
            None => return,
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Permanently breaks the broker: no more items are ever accepted, all
    /// pending items are dropped, and every waiter (current and future)
    /// returns `None` immediately.
    pub fn break_queue(&self) {
        {
            let mut state = self.state.lock();
            state.open = false;
            state.items.clear();
        }
        self.cond.notify_all();
    }

    /// `true` once [`break_queue`](Broker::break_queue) has run.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Current number of threads blocked in `wait`/`wait_for`.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Current number of queued items.
    pub fn pending_count(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.break_queue();
        // Workers hold only a weak reference to the broker and are torn
        // down by their pool before the broker's last strong reference
        // disappears, so this should resolve immediately in practice; it
        // guards against a caller dropping the broker out of order.
        while !self.state.lock().waiters.is_empty() {
            std::thread::yield_now();
        }
    }
}
