//! Cross-thread ordering of named-window deliveries.
//!
//! Tickets of one window must complete in production order no matter which
//! worker thread dispatches them.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use laminar_dispatch::testing::{MockStatement, RecordingView};
use laminar_dispatch::{
    DeltaRecord, DispatchConfig, DispatchService, LatchConfig, WaitStrategy, WindowTail,
};

type Fixture = (
    Arc<DispatchService>,
    Arc<WindowTail<u64>>,
    Arc<RecordingView<u64>>,
);

fn setup(latch: LatchConfig) -> Fixture {
    let service = Arc::new(DispatchService::new(DispatchConfig::default()));
    let tail = Arc::new(WindowTail::<u64>::new("orders", latch, service.config()));
    let view = RecordingView::<u64>::new();
    tail.add_consumer(MockStatement::new(1, "select_orders"), view.clone());
    (service, tail, view)
}

#[test]
fn test_later_ticket_waits_for_earlier_thread() {
    let (service, tail, view) = setup(LatchConfig::default());

    let (published_tx, published_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let svc = Arc::clone(&service);
    let t = Arc::clone(&tail);
    let first = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![0]));
        published_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        worker.dispatch().unwrap();
    });
    published_rx.recv().unwrap();

    let svc = Arc::clone(&service);
    let t = Arc::clone(&tail);
    let second = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![1]));
        worker.dispatch().unwrap();
    });

    go_tx.send(()).unwrap();
    first.join().unwrap();
    second.join().unwrap();

    assert_eq!(view.inserted(), vec![0, 1]);
}

#[test]
fn test_earlier_ticket_in_another_workers_queue_is_awaited() {
    let (service, tail, view) = setup(LatchConfig::default());

    let (queue_tx, queue_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let svc = Arc::clone(&service);
    let remote = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        queue_tx.send(worker.queue()).unwrap();
        go_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        worker.dispatch().unwrap();
    });
    let remote_queue = queue_rx.recv().unwrap();

    // This thread issues both tickets, the first into the remote worker.
    let mut worker = service.worker::<u64>();
    assert!(tail.publish(&remote_queue, DeltaRecord::insert_only(vec![0])));
    assert!(tail.publish(&worker.queue(), DeltaRecord::insert_only(vec![1])));

    go_tx.send(()).unwrap();
    worker.dispatch().unwrap();
    remote.join().unwrap();

    assert_eq!(view.inserted(), vec![0, 1]);
}

#[test]
fn test_same_worker_tickets_share_a_round_without_waiting() {
    let latch = LatchConfig::builder()
        .timeout(Duration::from_secs(5))
        .build();
    let (service, tail, view) = setup(latch);
    let mut worker = service.worker::<u64>();

    for v in 0..4 {
        tail.publish(&worker.queue(), DeltaRecord::insert_only(vec![v]));
    }
    worker.dispatch().unwrap();

    assert_eq!(view.inserted(), vec![0, 1, 2, 3]);
    assert_eq!(view.update_count(), 1);
    assert_eq!(service.metrics().latch_timeouts(), 0);
}

#[test]
fn test_interleaved_workers_do_not_wait_on_each_other() {
    let (service, tail, view) = setup(LatchConfig::default());

    // Worker A holds tickets 0 and 2, worker B holds ticket 1.
    let (step_tx, step_rx) = mpsc::channel::<&'static str>();
    let (a_tx, a_rx) = mpsc::channel::<()>();
    let (b_tx, b_rx) = mpsc::channel::<()>();

    let svc = Arc::clone(&service);
    let t = Arc::clone(&tail);
    let steps = step_tx.clone();
    let worker_a = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![0]));
        steps.send("a0").unwrap();
        a_rx.recv().unwrap();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![2]));
        steps.send("a2").unwrap();
        a_rx.recv().unwrap();
        worker.dispatch().unwrap();
    });

    let svc = Arc::clone(&service);
    let t = Arc::clone(&tail);
    let worker_b = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        b_rx.recv().unwrap();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![1]));
        step_tx.send("b1").unwrap();
        b_rx.recv().unwrap();
        worker.dispatch().unwrap();
    });

    assert_eq!(step_rx.recv().unwrap(), "a0");
    b_tx.send(()).unwrap();
    assert_eq!(step_rx.recv().unwrap(), "b1");
    a_tx.send(()).unwrap();
    assert_eq!(step_rx.recv().unwrap(), "a2");

    // Both dispatch at once.
    a_tx.send(()).unwrap();
    b_tx.send(()).unwrap();
    worker_a.join().unwrap();
    worker_b.join().unwrap();

    assert_eq!(view.inserted(), vec![0, 1, 2]);
}

#[test]
fn test_many_producers_complete_in_production_order() {
    const THREADS: u64 = 4;
    const PER_THREAD: u64 = 200;

    for strategy in [WaitStrategy::Park, WaitStrategy::SpinYield] {
        let latch = LatchConfig::builder().wait_strategy(strategy).build();
        let (service, tail, view) = setup(latch);
        let counter = Arc::new(Mutex::new(0_u64));

        let handles: Vec<_> = (0..THREADS)
            .map(|thread_idx| {
                let svc = Arc::clone(&service);
                let t = Arc::clone(&tail);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut worker = svc.worker::<u64>();
                    for i in 0..PER_THREAD {
                        {
                            // Value order matches ticket order.
                            let mut next = counter.lock();
                            t.publish(&worker.queue(), DeltaRecord::insert_only(vec![*next]));
                            *next += 1;
                        }
                        if (i + thread_idx) % 3 == 0 {
                            worker.dispatch().unwrap();
                        }
                    }
                    worker.dispatch().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let delivered = view.inserted();
        let expected: Vec<u64> = (0..THREADS * PER_THREAD).collect();
        assert_eq!(delivered, expected, "strategy {strategy:?}");
        assert_eq!(service.metrics().tickets_dispatched(), THREADS * PER_THREAD);
    }
}

#[test]
fn test_unordered_latches_deliver_without_waiting() {
    let (service, tail, view) = setup(LatchConfig::unordered());

    let (published_tx, published_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let t = Arc::clone(&tail);
    let svc = Arc::clone(&service);
    let holder = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![0]));
        published_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        worker.dispatch().unwrap();
    });
    published_rx.recv().unwrap();

    let mut worker = service.worker::<u64>();
    tail.publish(&worker.queue(), DeltaRecord::insert_only(vec![1]));
    worker.dispatch().unwrap();
    assert_eq!(view.inserted(), vec![1]);

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(view.inserted(), vec![1, 0]);
}

#[test]
fn test_latch_timeout_delivers_out_of_order() {
    let latch = LatchConfig::builder()
        .timeout(Duration::from_millis(20))
        .build();
    let (service, tail, view) = setup(latch);

    let (published_tx, published_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let t = Arc::clone(&tail);
    let svc = Arc::clone(&service);
    let holder = thread::spawn(move || {
        let mut worker = svc.worker::<u64>();
        t.publish(&worker.queue(), DeltaRecord::insert_only(vec![0]));
        published_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        worker.dispatch().unwrap();
    });
    published_rx.recv().unwrap();

    let mut worker = service.worker::<u64>();
    tail.publish(&worker.queue(), DeltaRecord::insert_only(vec![1]));
    worker.dispatch().unwrap();
    assert_eq!(view.inserted(), vec![1]);
    assert_eq!(service.metrics().latch_timeouts(), 1);

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(view.inserted(), vec![1, 0]);
}
