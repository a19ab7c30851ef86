//! Replay after crash: interruption, repetition, disabled replay

use crate::*;
use rustc_hash::FxHashMap;

fn crashed_with_writes(count: u64) -> (Crashed, Vec<(u64, u64, Vec<u8>)>) {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let writes: Vec<_> = (0..count).map(|i| (8, i * 10, data(i as u8, 10))).collect();
    let mut seq = 0;
    for (file_id, offset, data) in &writes {
        seq = h.write(*file_id, *offset, data);
    }
    h.zilog.commit(seq, 8);
    (h.crash(), writes)
}

/// Applies writes to `dataset`, counting applications per record, and fails
/// every time on record `fail_seq`.
fn counting_table(
    dataset: &Arc<MemDataset>,
    applied: &Arc<Mutex<FxHashMap<u64, u32>>>,
    fail_seq: u64,
) -> ReplayTable {
    let inner = dataset.replay_table();
    let applied = Arc::clone(applied);
    ReplayTable::new().with(TxType::Write, move |record, epoch| {
        if record.seq == fail_seq {
            return Err(format!("refusing record {}", record.seq));
        }
        let apply = inner
            .get(record.txtype)
            .ok_or_else(|| "no write handler".to_string())?;
        apply(record, epoch)?;
        *applied.lock().entry(record.seq).or_default() += 1;
        Ok(())
    })
}

#[test]
fn test_interrupted_replay_resumes_after_last_applied_record() {
    let (crashed, writes) = crashed_with_writes(5);
    let (h, _) = crashed.import();
    let applied = Arc::new(Mutex::new(FxHashMap::default()));

    let err = h
        .zilog
        .replay(&counting_table(&h.dataset, &applied, 3))
        .unwrap_err();
    assert!(matches!(err, Error::Replay { seq: 3, .. }));
    assert!(h.header.lock().replay_needed());
    assert_eq!(h.header.lock().replay_seq, 2);
    assert!(!h.zilog.is_replaying());

    let report = h
        .zilog
        .replay(&counting_table(&h.dataset, &applied, 0))
        .unwrap();
    assert_eq!(report.records_skipped, 2);
    assert_eq!(report.records_replayed, 3);
    assert!(applied.lock().values().all(|&n| n == 1));
    assert_eq!(applied.lock().len(), 5);
    assert_eq!(h.dataset.files(), expected(&writes));
}

#[test]
fn test_replay_resumes_after_crash_during_replay() {
    let (crashed, writes) = crashed_with_writes(4);
    let (h, _) = crashed.import();
    let applied = Arc::new(Mutex::new(FxHashMap::default()));
    h.zilog
        .replay(&counting_table(&h.dataset, &applied, 4))
        .unwrap_err();

    // The first three records and the claim are durable; crash again.
    let (h, outcome) = h.crash().import();
    assert!(!outcome.claimed);
    let report = h
        .zilog
        .replay(&counting_table(&h.dataset, &applied, 0))
        .unwrap();
    assert_eq!(report.records_replayed, 1);
    assert_eq!(applied.lock().get(&4), Some(&1));
    assert!(applied.lock().values().all(|&n| n == 1));
    assert_eq!(h.dataset.files(), expected(&writes));
    assert_eq!(h.store.stats().bad_frees, 0);
}

#[test]
fn test_second_replay_is_a_noop() {
    let (crashed, writes) = crashed_with_writes(3);
    let (h, _) = crashed.import();
    let table = h.dataset.replay_table();
    assert_eq!(h.zilog.replay(&table).unwrap().records_replayed, 3);
    assert_eq!(h.zilog.replay(&table).unwrap().records_replayed, 0);
    assert_eq!(h.dataset.files(), expected(&writes));
}

#[test]
fn test_replay_disabled_discards_the_log() {
    let (crashed, _) = crashed_with_writes(3);
    let config = ZilConfig {
        replay_disabled: true,
        ..ZilConfig::default()
    };
    let (h, outcome) = crashed.import_with(config);
    assert!(outcome.replay_needed);

    let report = h.zilog.replay(&h.dataset.replay_table()).unwrap();
    assert_eq!(report, ReplayReport::default());
    h.epochs.sync_now();
    assert!(h.header.lock().is_empty());
    assert!(h.dataset.files().is_empty());
    assert_eq!(h.store.live_blocks(ChecksumKind::Embedded), 0);
}

#[test]
fn test_writes_after_replay_form_a_new_chain() {
    let (crashed, mut writes) = crashed_with_writes(2);
    let (h, _) = crashed.import();
    h.zilog.replay(&h.dataset.replay_table()).unwrap();

    h.warm_up();
    for i in 0..3u64 {
        let payload = data(100 + i as u8, 10);
        let seq = h.write(9, i * 10, &payload);
        writes.push((9, i * 10, payload));
        h.zilog.commit(seq, 9);
    }

    let (h, outcome) = h.crash().import();
    assert_eq!(outcome.records, 3);
    h.zilog.replay(&h.dataset.replay_table()).unwrap();
    assert_eq!(h.dataset.files(), expected(&writes));
}

#[test]
fn test_crash_before_the_claim_syncs_claims_again() {
    let (crashed, writes) = crashed_with_writes(3);
    let (h, first) = crashed.import();
    assert!(first.claimed);

    // Nothing synced since the import, so the claim never reached disk.
    let (h, second) = h.crash().import();
    assert!(second.claimed);
    assert!(second.replay_needed);
    assert_eq!(second.records, 3);

    let report = h.zilog.replay(&h.dataset.replay_table()).unwrap();
    assert_eq!(report.records_replayed, 3);
    assert_eq!(h.dataset.files(), expected(&writes));
    assert_eq!(h.store.stats().bad_frees, 0);
}
