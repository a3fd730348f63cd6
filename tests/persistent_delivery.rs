//! Delivery-semantics tests for persistent subscriptions: strict ordering,
//! back-pressure, subscriber churn and partitioned routing under load.

use signalbus::{
    Bus, BusConfig, ExpectedVersion, PersistentOptions, RecordedSignal, Sequence, SignalInput,
    StartFrom, StreamTarget,
};
use std::thread;
use std::time::Duration;

fn test_bus() -> Bus {
    Bus::start(BusConfig::default())
}

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

fn keyed(key: &str) -> SignalInput {
    SignalInput::raw(key, Vec::new())
}

#[test]
fn test_limit_one_never_runs_ahead_of_acks() {
    let bus = test_bus();

    let sub = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "serial",
            StartFrom::Origin,
            PersistentOptions::default().with_concurrency_limit(1),
        )
        .unwrap();

    let inputs: Vec<_> = (0..10).map(|_| keyed("x")).collect();
    bus.publish("orders", ExpectedVersion::Any, inputs).unwrap();

    for expected in 1..=10u64 {
        let signal = sub.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(signal.signal_number, Sequence(expected));
        // Signal k+1 is never dispatched before k is acked
        assert!(sub.try_recv().is_err());
        sub.ack(&signal).unwrap();
    }

    bus.shutdown();
}

#[test]
fn test_churn_preserves_every_signal() {
    let bus = test_bus();

    let inputs: Vec<_> = (0..5).map(|_| keyed("x")).collect();
    bus.publish("orders", ExpectedVersion::Any, inputs).unwrap();

    // Repeatedly receive one signal, ack or abandon it, and reconnect.
    // Abandoned signals must come back; acked ones must not.
    let mut acked = Vec::new();
    let mut abandon = true;
    while acked.len() < 5 {
        let sub = bus
            .subscribe_persistent(
                StreamTarget::stream("orders"),
                "churny",
                StartFrom::Origin,
                PersistentOptions::default(),
            )
            .unwrap();
        let signal = sub.recv_timeout(RECV_TIMEOUT).unwrap();
        if abandon {
            // Walk away with the signal unacked
            sub.unsubscribe().unwrap();
        } else {
            sub.ack(&signal).unwrap();
            acked.push(signal.signal_number.0);
            sub.unsubscribe().unwrap();
        }
        abandon = !abandon;
    }

    assert_eq!(acked, vec![1, 2, 3, 4, 5]);

    bus.shutdown();
}

#[test]
fn test_threaded_consumer_drains_backlog() {
    let bus = test_bus();

    let sub = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "worker",
            StartFrom::Origin,
            PersistentOptions::default(),
        )
        .unwrap();

    let consumer = thread::spawn(move || {
        let mut seen = Vec::new();
        for _ in 0..100 {
            let signal = sub.recv_timeout(Duration::from_secs(5)).unwrap();
            sub.ack(&signal).unwrap();
            seen.push(signal.signal_number.0);
        }
        seen
    });

    for chunk in 0..10 {
        let inputs: Vec<_> = (0..10).map(|i| keyed(&format!("{}-{}", chunk, i))).collect();
        bus.publish("orders", ExpectedVersion::Any, inputs).unwrap();
    }

    let seen = consumer.join().unwrap();
    assert_eq!(seen, (1..=100).collect::<Vec<_>>());

    bus.shutdown();
}

#[test]
fn test_partitioned_two_workers_cover_all_keys() {
    let bus = test_bus();

    let opts = PersistentOptions::default()
        .with_partition_by(|s: &RecordedSignal| s.signal_type.clone());
    let h1 = bus
        .subscribe_persistent(StreamTarget::stream("orders"), "sharded", StartFrom::Origin, opts)
        .unwrap();
    let h2 = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "sharded",
            StartFrom::Origin,
            PersistentOptions::default(),
        )
        .unwrap();

    let worker = |handle: signalbus::PersistentSubscription| {
        thread::spawn(move || {
            let mut per_key: std::collections::HashMap<String, Vec<u64>> = Default::default();
            while let Ok(signal) = handle.recv_timeout(Duration::from_millis(500)) {
                handle.ack(&signal).unwrap();
                per_key
                    .entry(signal.signal_type.clone())
                    .or_default()
                    .push(signal.signal_number.0);
            }
            per_key
        })
    };
    let w1 = worker(h1);
    let w2 = worker(h2);

    // 40 signals across 4 keys, interleaved
    for round in 0..10 {
        let inputs: Vec<_> = ["k0", "k1", "k2", "k3"].iter().map(|k| keyed(k)).collect();
        bus.publish("orders", ExpectedVersion::Exact(round * 4), inputs)
            .unwrap();
    }

    let mut per_key = w1.join().unwrap();
    for (key, numbers) in w2.join().unwrap() {
        // A key is owned by exactly one worker while the slot set is stable
        assert!(
            per_key.insert(key.clone(), numbers).is_none(),
            "key {} was delivered to both workers",
            key
        );
    }

    // Every key saw its full sequence in submission order
    assert_eq!(per_key.len(), 4);
    let mut all_numbers: Vec<u64> = Vec::new();
    for numbers in per_key.values() {
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        all_numbers.extend(numbers);
    }
    all_numbers.sort_unstable();
    assert_eq!(all_numbers, (1..=40).collect::<Vec<_>>());

    bus.shutdown();
}

#[test]
fn test_start_from_current_skips_backlog() {
    let bus = test_bus();

    bus.publish("orders", ExpectedVersion::Any, vec![keyed("old")])
        .unwrap();

    let sub = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "live-only",
            StartFrom::Current,
            PersistentOptions::default(),
        )
        .unwrap();
    assert!(sub.try_recv().is_err());

    bus.publish("orders", ExpectedVersion::Any, vec![keyed("new")])
        .unwrap();
    let signal = sub.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(signal.signal_type, "new");
    assert_eq!(signal.signal_number, Sequence(2));

    bus.shutdown();
}

#[test]
fn test_checkpoint_survives_idle_period() {
    let bus = test_bus();

    bus.publish("orders", ExpectedVersion::Any, vec![keyed("a"), keyed("b")])
        .unwrap();

    let sub = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "proj",
            StartFrom::Origin,
            PersistentOptions::default(),
        )
        .unwrap();
    let first = sub.recv_timeout(RECV_TIMEOUT).unwrap();
    sub.ack(&first).unwrap();
    let second = sub.recv_timeout(RECV_TIMEOUT).unwrap();
    sub.ack(&second).unwrap();
    sub.unsubscribe().unwrap();

    // While the subscription sits slot-less, more signals arrive.
    bus.publish("orders", ExpectedVersion::Any, vec![keyed("c")])
        .unwrap();

    // Re-attach: only the unseen tail is delivered, despite StartFrom::Origin.
    let sub = bus
        .subscribe_persistent(
            StreamTarget::stream("orders"),
            "proj",
            StartFrom::Origin,
            PersistentOptions::default(),
        )
        .unwrap();
    let third = sub.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(third.signal_type, "c");
    assert_eq!(third.signal_number, Sequence(3));
    assert!(sub.try_recv().is_err());

    bus.shutdown();
}
