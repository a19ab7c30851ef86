//! Concurrent committers

use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_committers_share_block_writes() {
    const THREADS: u64 = 8;
    let h = Arc::new(Harness::new(ZilConfig::default()));
    h.warm_up();
    h.store.set_write_latency(Some(Duration::from_millis(2)));
    let before = h.store.stats();

    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let h = Arc::clone(&h);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let now = h.zilog.commit_seq();
                assert!(now >= last, "commit_seq went back from {} to {}", last, now);
                last = now;
                thread::yield_now();
            }
        })
    };

    let barrier = Arc::new(Barrier::new(THREADS as usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|file_id| {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let seq = h.write(file_id, 0, &data(file_id as u8, 64));
                h.zilog.commit(seq, file_id);
                assert!(h.zilog.commit_seq() >= seq);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    observer.join().unwrap();

    let after = h.store.stats();
    assert!(after.writes - before.writes <= THREADS);
    assert!(after.writes > before.writes);
    assert_eq!(h.zilog.commit_seq(), h.zilog.itx_seq());
    assert_eq!(h.zilog.stats().commit_count, THREADS + 1);
}

#[test]
fn test_commit_seq_stays_below_queued_foreign_itx() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();

    let foreign = Itx::new(TxType::Create, h.epochs.current_epoch(), 2, b"other".to_vec());
    let foreign_seq = h.zilog.submit(foreign).unwrap();
    let seq = h.write(1, 0, b"mine");

    h.zilog.commit(seq, 1);
    assert_eq!(h.zilog.commit_seq(), foreign_seq - 1);
    assert_eq!(h.zilog.pending_len(), 1);

    h.zilog.commit(seq, 0);
    assert_eq!(h.zilog.commit_seq(), seq);
    assert_eq!(h.zilog.pending_len(), 0);
}

#[test]
fn test_commit_of_durable_sequence_returns_without_io() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let seq = h.write(1, 0, b"once");
    h.zilog.commit(seq, 1);
    let writes = h.store.stats().writes;

    h.zilog.commit(seq, 1);
    h.zilog.commit(0, 0);
    assert_eq!(h.store.stats().writes, writes);
}

#[test]
fn test_sync_always_logs_async_submissions() {
    let config = ZilConfig {
        sync: SyncPolicy::Always,
        ..ZilConfig::default()
    };
    let h = Harness::new(config);
    h.warm_up();
    let itx = Itx::new(TxType::Create, h.epochs.current_epoch(), 2, b"async".to_vec());
    let seq = h.zilog.submit(itx).unwrap();

    // Scoped to another object, but the record was forced synchronous.
    h.zilog.commit(seq, 1);
    assert_eq!(h.zilog.commit_seq(), seq);
    assert_eq!(h.zilog.pending_len(), 0);
}

#[test]
fn test_sync_disabled_never_writes() {
    let config = ZilConfig {
        sync: SyncPolicy::Disabled,
        ..ZilConfig::default()
    };
    let h = Harness::new(config);
    let seq = h.write(1, 0, b"unlogged");
    h.zilog.commit(seq, 1);
    assert_eq!(h.store.stats().writes, 0);
    assert_eq!(h.zilog.commit_seq(), 0);
}
