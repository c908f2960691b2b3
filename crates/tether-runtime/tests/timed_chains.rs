//! End-to-end tests: time-buffered chains driven by a real timer thread.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tether_core::{ManualProducer, ManualScheduler, Scheduler, StatefulProducer};
use tether_runtime::{TimerConfig, TimerThread};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn timer() -> Arc<dyn Scheduler> {
    Arc::new(
        TimerThread::start(TimerConfig::default().with_thread_name("tether-timer-test"))
            .expect("spawn timer thread"),
    )
}

#[test]
fn delay_delivers_in_order_after_interval() {
    init_tracing();
    let producer = ManualProducer::<u32>::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _chain = producer
        .begin()
        .delay(Duration::from_millis(20), timer())
        .sink(move |v| {
            let _ = tx.lock().unwrap().send((v, Instant::now()));
        });

    let pushed = Instant::now();
    producer.notify(1);
    producer.notify(2);

    let (first, at) = rx.recv_timeout(WAIT).expect("first delayed value");
    let (second, _) = rx.recv_timeout(WAIT).expect("second delayed value");
    assert_eq!((first, second), (1, 2));
    assert!(at.duration_since(pushed) >= Duration::from_millis(20));
}

#[test]
fn debounce_keeps_only_the_last_value_of_a_burst() {
    init_tracing();
    let holder = StatefulProducer::new(0u32);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _chain = holder
        .begin()
        .debounce(Duration::from_millis(40), timer())
        .sink(move |v| {
            let _ = tx.lock().unwrap().send(v);
        });

    for v in 1..=5 {
        holder.set_value(v);
    }

    assert_eq!(rx.recv_timeout(WAIT).ok(), Some(5));
    assert!(rx.recv_timeout(Duration::from_millis(120)).is_err());
}

#[test]
fn unbounded_delay_does_not_panic_the_push() {
    init_tracing();
    let producer = ManualProducer::<u32>::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _chain = producer
        .begin()
        .delay(Duration::MAX, timer())
        .sink(move |v| {
            let _ = tx.lock().unwrap().send(v);
        });

    producer.notify(1);
    producer.notify(2);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn dropping_chain_cancels_pending_delivery() {
    init_tracing();
    let producer = ManualProducer::<u32>::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let chain = producer
        .begin()
        .delay(Duration::from_millis(30), timer())
        .sink(move |v| {
            let _ = tx.lock().unwrap().send(v);
        });

    producer.notify(7);
    drop(chain);

    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
}

#[test]
fn delayed_value_re_enters_downstream_stages() {
    init_tracing();
    let producer = ManualProducer::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _chain = producer
        .begin()
        .to(|v| v * 2)
        .delay(Duration::from_millis(10), timer())
        .guard(|v| *v > 4)
        .to(|v| v + 1)
        .sink(move |v| {
            log.lock().unwrap().push(v);
            let _ = tx.lock().unwrap().send(());
        });

    for v in [1, 3, 2, 5] {
        producer.notify(v);
    }
    for _ in 0..2 {
        rx.recv_timeout(WAIT).expect("guarded value arrived");
    }
    thread::sleep(Duration::from_millis(30));
    assert_eq!(*seen.lock().unwrap(), vec![7, 11]);
}

#[test]
fn manual_and_threaded_schedulers_agree_on_debounce() {
    init_tracing();
    let burst = [3u32, 1, 4, 1, 5];

    let manual = Arc::new(ManualScheduler::new());
    let manual_seen = Arc::new(Mutex::new(Vec::new()));
    let holder = ManualProducer::<u32>::new();
    let log = Arc::clone(&manual_seen);
    let _manual_chain = holder
        .begin()
        .debounce(Duration::from_millis(25), manual.clone())
        .sink(move |v| log.lock().unwrap().push(v));
    for v in burst {
        holder.notify(v);
    }
    manual.advance(Duration::from_millis(25));

    let threaded = ManualProducer::<u32>::new();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let _threaded_chain = threaded
        .begin()
        .debounce(Duration::from_millis(25), timer())
        .sink(move |v| {
            let _ = tx.lock().unwrap().send(v);
        });
    for v in burst {
        threaded.notify(v);
    }

    let threaded_last = rx.recv_timeout(WAIT).expect("debounced value");
    assert_eq!(*manual_seen.lock().unwrap(), vec![threaded_last]);
}
