//! End-to-end worker pool sizing scenarios, exercised through the public
//! crate API.

use std::sync::Once;
use std::time::{Duration, Instant};

use tq_runtime::{Broker, WorkerPool};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(env_logger::init);
}

/// A worker only occupies a waiter-map slot once it actually blocks in its
/// first `wait` call, so `waiter_count()` converges to the pool size rather
/// than matching it the instant `WorkerPool::new`/`increase` returns.
fn wait_until_waiter_count(broker: &Broker, expected: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let got = broker.waiter_count();
        if got == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "waiter_count stuck at {got}, expected {expected}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn pool_sizing_stabilises_after_increase_and_decrease() {
    init();
    let broker = Broker::new();
    let pool = WorkerPool::new(&broker, 2).unwrap();
    wait_until_waiter_count(&broker, 2, Duration::from_secs(1));

    pool.increase().unwrap();
    assert_eq!(pool.size(), 3);
    wait_until_waiter_count(&broker, 3, Duration::from_secs(1));

    pool.decrease();
    pool.decrease();
    assert_eq!(pool.size(), 1);
    wait_until_waiter_count(&broker, 1, Duration::from_secs(1));

    pool.decrease();
    assert_eq!(pool.size(), 0);
    assert_eq!(broker.waiter_count(), 0);
}

#[test]
fn dropping_the_pool_empties_the_broker_waiter_map() {
    init();
    let broker = Broker::new();
    let pool = WorkerPool::new(&broker, 4).unwrap();
    wait_until_waiter_count(&broker, 4, Duration::from_secs(1));
    drop(pool);
    assert_eq!(broker.waiter_count(), 0);
}
