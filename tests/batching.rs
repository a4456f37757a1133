//! Integration tests for report batching.

use authrep_cache::{BatchConfig, BucketKey, FullHandler, Identity, Metrics, ReportBatcher, ReportRecord};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn record(service: &str, user_key: &str, seq: i64) -> ReportRecord {
    ReportRecord::new(
        "tok",
        service,
        Identity::user_key(user_key),
        [("hits", seq)].into_iter().collect(),
    )
}

fn batcher(full_threshold: usize, max_records: usize) -> ReportBatcher {
    let mut config = BatchConfig::new("https://backend.example/transactions.xml");
    config.full_threshold = full_threshold;
    config.max_records = max_records;
    ReportBatcher::new(config, Metrics::new())
}

#[test]
fn test_full_signal_fires_once_per_crossing() {
    let signals = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&signals);
    let handler: FullHandler = Arc::new(move |bucket: &BucketKey| {
        assert_eq!(bucket.credential(), "abc");
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let batcher = batcher(3, 100).with_full_handler(handler);

    for seq in 0..5 {
        batcher.add_record(record("svc", "abc", seq));
    }
    assert_eq!(signals.load(Ordering::SeqCst), 1);

    // Draining below the threshold re-arms the signal
    assert_eq!(batcher.drain().len(), 1);
    for seq in 0..3 {
        batcher.add_record(record("svc", "abc", seq));
    }
    assert_eq!(signals.load(Ordering::SeqCst), 2);
}

#[test]
fn test_drain_caps_payload_and_keeps_remainder_in_order() {
    let batcher = batcher(500, 2);
    for seq in 1..=5 {
        batcher.add_record(record("svc", "abc", seq));
    }

    let first = batcher.drain();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].len(), 2);
    assert!(first[0].body().contains("transactions%5B0%5D%5Busage%5D%5Bhits%5D=1"));
    assert!(first[0].body().contains("transactions%5B1%5D%5Busage%5D%5Bhits%5D=2"));
    assert_eq!(batcher.pending(), 3);

    let second = batcher.drain();
    assert!(second[0].body().contains("transactions%5B0%5D%5Busage%5D%5Bhits%5D=3"));

    let third = batcher.drain();
    assert_eq!(third[0].len(), 1);
    assert!(batcher.drain().is_empty());
    assert_eq!(batcher.bucket_count(), 0);
}

#[test]
fn test_one_payload_per_bucket() {
    let batcher = batcher(500, 100);
    batcher.add_record(record("svc", "b", 1));
    batcher.add_record(record("svc", "a", 1));
    batcher.add_record(record("other", "a", 1));
    batcher.add_record(record("svc", "a", 1));

    let payloads = batcher.drain();
    let buckets: Vec<&BucketKey> = payloads.iter().map(|p| p.bucket()).collect();
    assert_eq!(
        buckets,
        vec![
            &BucketKey::new("other", "a"),
            &BucketKey::new("svc", "a"),
            &BucketKey::new("svc", "b"),
        ]
    );
    assert_eq!(payloads[1].len(), 2);
}

#[test]
fn test_invalid_records_are_dropped_and_counted() {
    let metrics = Metrics::new();
    let batcher = ReportBatcher::new(BatchConfig::new("e"), metrics.clone());
    batcher.add_record(record("svc", "abc", 1));
    batcher.add_record(ReportRecord::new(
        "tok",
        "svc",
        Identity::user_key("abc"),
        Default::default(),
    ));

    let payloads = batcher.drain();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].len(), 1);
    assert_eq!(metrics.snapshot().records_rejected, 1);
}

#[test]
fn test_concurrent_add_and_drain_loses_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: i64 = 500;

    let batcher = Arc::new(batcher(50, 64));
    let drained = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..THREADS)
        .map(|t| {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || {
                let user_key = format!("user-{}", t % 3);
                for seq in 0..PER_THREAD {
                    batcher.add_record(record("svc", &user_key, seq + 1));
                }
            })
        })
        .collect();

    let drainer = {
        let batcher = Arc::clone(&batcher);
        let drained = Arc::clone(&drained);
        thread::spawn(move || {
            for _ in 0..200 {
                for payload in batcher.drain() {
                    assert!(payload.len() <= 64);
                    drained.fetch_add(payload.len(), Ordering::SeqCst);
                }
                thread::yield_now();
            }
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    drainer.join().unwrap();

    loop {
        let payloads = batcher.drain();
        if payloads.is_empty() {
            break;
        }
        for payload in payloads {
            drained.fetch_add(payload.len(), Ordering::SeqCst);
        }
    }

    assert_eq!(drained.load(Ordering::SeqCst), THREADS * PER_THREAD as usize);
    assert_eq!(batcher.pending(), 0);
}

#[test]
fn test_records_never_delivered_twice() {
    let batcher = batcher(500, 10);
    for seq in 0..25 {
        batcher.add_record(record("svc", "abc", seq + 1));
    }

    let mut seen = HashSet::new();
    while let Some(payload) = batcher.drain().pop() {
        for pair in payload.body().split('&') {
            if pair.contains("usage") {
                assert!(seen.insert(pair.rsplit('=').next().unwrap().to_string()));
            }
        }
    }
    assert_eq!(seen.len(), 25);
}
