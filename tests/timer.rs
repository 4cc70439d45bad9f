//! End-to-end timer cadence scenarios, exercised through the public crate
//! API.
//!
//! The timer service is a process-wide singleton (spec.md §4.5), so these
//! tests use generous tolerances rather than the seed scenarios' exact
//! bounds — sharing one OS thread with whatever else the test binary runs
//! concurrently means strict wall-clock windows are flaky in practice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use tq_runtime::{loc, Broker, Runtime, Timer, WorkerPool};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(env_logger::init);
}

fn fresh_queue() -> Arc<tq_runtime::SerialQueue> {
    let broker = Broker::new();
    let pool = WorkerPool::new(&broker, 2).unwrap();
    Runtime::create_serial_queue_with(&broker, &pool)
}

#[test]
fn periodic_timer_reaches_ten_fires_within_roughly_one_period_each() {
    init();
    let queue = fresh_queue();
    let period = Duration::from_millis(10);
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let start = Instant::now();
    let count2 = count.clone();
    let timer = Timer::start(
        &queue,
        loc!(),
        move || {
            let n = count2.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 10 {
                let _ = tx.send(());
            }
        },
        period,
        false,
    );

    rx.recv_timeout(Duration::from_secs(2))
        .expect("timer should have fired ten times");
    let elapsed = start.elapsed();
    timer.stop();

    // Ten periods of 10ms should take at least ~90ms (the first fire lands
    // at t=period, not t=0) and should not blow past a generous upper bound
    // even under scheduler contention.
    assert!(elapsed >= Duration::from_millis(80), "elapsed={elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "elapsed={elapsed:?}");
}

#[test]
fn fire_now_runs_the_job_before_the_first_period_elapses() {
    init();
    let queue = fresh_queue();
    let (tx, rx) = mpsc::channel();

    let timer = Timer::start(
        &queue,
        loc!(),
        move || {
            let _ = tx.send(());
        },
        Duration::from_millis(200),
        true,
    );

    rx.recv_timeout(Duration::from_millis(100))
        .expect("fire_now should post the job immediately");
    timer.stop();
}

#[test]
fn stop_halts_further_fires_within_one_period() {
    init();
    let queue = fresh_queue();
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
    assert!(!timer.is_running());
    let after_stop = count.load(Ordering::SeqCst);

    std::thread::sleep(Duration::from_millis(150));
    assert!(count.load(Ordering::SeqCst) <= after_stop + 1);
}

#[test]
fn start_once_after_runs_its_job_exactly_once() {
    init();
    let queue = fresh_queue();
    let count = Arc::new(AtomicUsize::new(0));
    let count2 = count.clone();

    let _timer = Timer::start_once_after(
        &queue,
        loc!(),
        move || {
            count2.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(10),
        None::<fn() -> bool>,
    );

    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
