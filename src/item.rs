//! The broker's unit of work: a payload plus its hooks and diagnostics.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use crate::Location;

/// Timestamps and the call-site tag handed to a task's hooks.
///
/// `started_at` is stamped by the worker right before the payload runs, so
/// hooks can measure queueing latency as `started_at - posted_at`.
#[derive(Debug, Clone, Copy)]
pub struct TaskMeta {
    /// Where the task was posted from.
    pub location: Location,
    /// When the task was submitted to its serial queue or broker.
    pub posted_at: Instant,
    /// When the worker began running the task's payload.
    pub started_at: Instant,
}

pub(crate) type Payload = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type Hook = Box<dyn FnOnce(&TaskMeta) + Send + 'static>;

/// A dispatched unit of work. Owned by the broker while queued, then by the
/// worker that dequeues it.
pub(crate) struct Item {
    pub(crate) id: u64,
    pub(crate) location: Location,
    pub(crate) posted_at: Instant,
    pub(crate) before: Option<Hook>,
    pub(crate) after: Option<Hook>,
    pub(crate) payload: Payload,
}

impl Item {
    /// `id` is assigned by the broker at insertion time; `0` until then.
    pub(crate) fn new(location: Location, payload: Payload) -> Self {
        Self {
            id: 0,
            location,
            posted_at: Instant::now(),
            before: None,
            after: None,
            payload,
        }
    }

    pub(crate) fn with_after(mut self, after: Hook) -> Self {
        self.after = Some(after);
        self
    }

    /// Runs before/payload/after in order, catching panics so a faulty task
    /// never takes its worker down with it.
    pub(crate) fn run(self) {
        let started_at = Instant::now();
        let meta = TaskMeta {
            location: self.location,
            posted_at: self.posted_at,
            started_at,
        };

        if let Some(before) = self.before {
            run_hook(self.location, "before", before, &meta);
        }

        run_payload(self.location, self.payload);

        if let Some(after) = self.after {
            run_hook(self.location, "after", after, &meta);
        }
    }
}

fn run_payload(location: Location, payload: Payload) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(payload)) {
        log::error!("task at {location} panicked: {}", panic_message(&panic));
    }
}

fn run_hook(location: Location, which: &str, hook: Hook, meta: &TaskMeta) {
    let hook = AssertUnwindSafe(hook);
    if let Err(panic) = panic::catch_unwind(move || (hook.0)(meta)) {
        log::error!(
            "{which} hook for task at {location} panicked: {}",
            panic_message(&panic)
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
