//! A process-wide priority-time-wheel scheduler that posts jobs onto
//! [`SerialQueue`]s at wall-clock instants.
//!
//! Grounded on `examples/original_source/src/timer.h`/`.cc`
//! (`timer_inner_worker`'s single background thread and min-heap, and
//! `timer::start`/`stop`'s shared status flag), with the catch-up-avoidance
//! cadence in [`reschedule`] ported from `fire_job_wrapper` verbatim.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::serial_queue::SerialQueue;
use crate::Location;

type Job = Box<dyn Fn() -> bool + Send + 'static>;

enum Kind {
    /// Reposts itself every `period` while `enabled` stays true.
    Periodic { period: Duration },
    /// Fires once, evaluating an optional predicate first.
    Once { pred: Option<Job> },
}

struct Entry {
    fire_at: Instant,
    sequence: u64,
    location: Location,
    queue: Weak<SerialQueue>,
    enabled: Arc<AtomicBool>,
    job: Arc<dyn Fn() + Send + Sync + 'static>,
    kind: Kind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_at, self.sequence).cmp(&(other.fire_at, other.sequence))
    }
}

struct Service {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    cond: Condvar,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl Service {
    fn new() -> Arc<Self> {
        let service = Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            next_sequence: std::sync::atomic::AtomicU64::new(0),
        });
        let worker = service.clone();
        std::thread::Builder::new()
            .name("tq-timer".into())
            .spawn(move || worker.run())
            .expect("failed to spawn timer service thread");
        service
    }

    fn global() -> Arc<Self> {
        static SERVICE: OnceLock<Arc<Service>> = OnceLock::new();
        SERVICE.get_or_init(Service::new).clone()
    }

    fn schedule(&self, entry: Entry) {
        self.heap.lock().push(Reverse(entry));
        self.cond.notify_all();
    }

    fn run(&self) {
        loop {
            let mut heap = self.heap.lock();
            let wait_for = match heap.peek() {
                None => Duration::from_millis(1000),
                Some(Reverse(entry)) => {
                    let now = Instant::now();
                    if entry.fire_at <= now {
                        let Reverse(entry) = heap.pop().expect("just peeked");
                        drop(heap);
                        fire(self, entry);
                        continue;
                    }
                    entry.fire_at - now
                }
            };
            self.cond.wait_for(&mut heap, wait_for);
        }
    }

    fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

fn fire(service: &Service, entry: Entry) {
    if !entry.enabled.load(Ordering::Acquire) {
        return;
    }
    let Some(queue) = entry.queue.upgrade() else {
        return;
    };

    match entry.kind {
        Kind::Periodic { period } => {
            let job = entry.job.clone();
            queue.post(entry.location, move || job());
            // `entry.kind` was just moved out above; pass the remaining
            // fields individually rather than `entry` as a whole, since
            // it's no longer intact as a single value.
            reschedule(
                service,
                entry.fire_at,
                entry.location,
                entry.queue,
                entry.enabled,
                entry.job,
                period,
            );
        }
        Kind::Once { ref pred } => {
            let fire_job = pred.as_ref().map_or(true, |pred| pred());
            if fire_job {
                let job = entry.job.clone();
                queue.post(entry.location, move || job());
            }
        }
    }
}

/// Advances the fire time by whole periods until it lands in the future, so
/// a long stall (e.g. the service thread starved) causes one catch-up fire
/// rather than a burst of them, then reschedules the (still-periodic) entry.
#[allow(clippy::too_many_arguments)]
fn reschedule(
    service: &Service,
    fire_at: Instant,
    location: Location,
    queue: Weak<SerialQueue>,
    enabled: Arc<AtomicBool>,
    job: Arc<dyn Fn() + Send + Sync + 'static>,
    period: Duration,
) {
    let now = Instant::now();
    let mut next_fire = fire_at + period;
    while next_fire <= now {
        next_fire += period;
    }
    service.schedule(Entry {
        fire_at: next_fire,
        sequence: service.next_sequence(),
        location,
        queue,
        enabled,
        job,
        kind: Kind::Periodic { period },
    });
}

/// A per-client handle to a scheduled job.
///
/// Dropping the handle does not stop the job; call [`stop`](Timer::stop)
/// (or let the handle's `enabled` flag be shared with something that does)
/// to end it. Cloning a started `Timer` gives another handle onto the same
/// underlying schedule.
#[derive(Clone)]
pub struct Timer {
    enabled: Arc<AtomicBool>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("enabled", &self.enabled.load(Ordering::Acquire))
            .finish()
    }
}

impl Timer {
    /// Schedules `job` to run on `queue` every `period`, starting at
    /// `now + period` (or immediately too, if `fire_now`).
    pub fn start(
        queue: &Arc<SerialQueue>,
        location: Location,
        job: impl Fn() + Send + Sync + 'static,
        period: Duration,
        fire_now: bool,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(true));
        let job: Arc<dyn Fn() + Send + Sync + 'static> = Arc::new(job);
        let service = Service::global();

        if fire_now {
            let job = job.clone();
            queue.post(location, move || job());
        }

        let fire_at = Instant::now() + period;
        service.schedule(Entry {
            fire_at,
            sequence: service.next_sequence(),
            location,
            queue: Arc::downgrade(queue),
            enabled: enabled.clone(),
            job,
            kind: Kind::Periodic { period },
        });

        Self { enabled }
    }

    /// Schedules `job` to run once, `delay` from now. If `pred` is given,
    /// it runs first (off the target queue's thread, on the timer
    /// service); `job` only runs if `pred` returns `true` or is absent.
    pub fn start_once_after(
        queue: &Arc<SerialQueue>,
        location: Location,
        job: impl Fn() + Send + Sync + 'static,
        delay: Duration,
        pred: Option<impl Fn() -> bool + Send + 'static>,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(true));
        let service = Service::global();
        service.schedule(Entry {
            fire_at: Instant::now() + delay,
            sequence: service.next_sequence(),
            location,
            queue: Arc::downgrade(queue),
            enabled: enabled.clone(),
            job: Arc::new(job),
            kind: Kind::Once {
                pred: pred.map(|p| Box::new(p) as Job),
            },
        });
        Self { enabled }
    }

    /// Disables this handle. The service thread notices at the next
    /// firing, so a periodic job may fire at most once more after this
    /// call returns.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// `true` until [`stop`](Timer::stop) is called.
    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::loc;
    use crate::worker_pool::WorkerPool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn setup() -> (Arc<Broker>, Arc<WorkerPool>, Arc<SerialQueue>) {
        let broker = Broker::new();
        let pool = WorkerPool::new(&broker, 2).unwrap();
        let queue = SerialQueue::new(&broker, &pool);
        (broker, pool, queue)
    }

    #[test]
    fn periodic_timer_fires_roughly_on_cadence() {
        let (_broker, _pool, queue) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let (tx, rx) = mpsc::channel();
        let timer = Timer::start(
            &queue,
            loc!(),
            move || {
                let n = count2.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 10 {
                    let _ = tx.send(());
                }
            },
            Duration::from_millis(10),
            false,
        );
        rx.recv_timeout(Duration::from_millis(500)).unwrap();
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 10);
    }

    #[test]
    fn fire_now_runs_before_the_first_period_elapses() {
        let (_broker, _pool, queue) = setup();
        let (tx, rx) = mpsc::channel();
        let timer = Timer::start(&queue, loc!(), move || tx.send(()).unwrap(), Duration::from_millis(50), true);
        rx.recv_timeout(Duration::from_millis(20)).unwrap();
        timer.stop();
    }

    #[test]
    fn stop_eventually_halts_further_fires() {
        let (_broker, _pool, queue) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let timer = Timer::start(
            &queue,
            loc!(),
            move || {
                count2.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(10),
            false,
        );
        std::thread::sleep(Duration::from_millis(35));
        timer.stop();
        let after_stop = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert!(count.load(Ordering::SeqCst) <= after_stop + 1);
    }

    #[test]
    fn start_once_after_only_fires_when_predicate_holds() {
        let (_broker, _pool, queue) = setup();
        let (tx, rx) = mpsc::channel::<()>();
        let _timer = Timer::start_once_after(
            &queue,
            loc!(),
            move || tx.send(()).unwrap(),
            Duration::from_millis(10),
            Some(|| false),
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
