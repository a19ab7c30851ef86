//! Commit, crash and replay of plain writes

use crate::*;

const FILE_A: u64 = 10;

#[test]
fn test_three_writes_need_one_block_and_one_flush() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let before = h.store.stats();

    let first = h.write(FILE_A, 0, b"alpha");
    h.write(FILE_A, 5, b"bravo");
    let last = h.write(FILE_A, 10, b"charlie");
    assert_eq!(last, first + 2);
    h.zilog.commit(last, FILE_A);

    let after = h.store.stats();
    assert_eq!(after.writes - before.writes, 1);
    assert_eq!(after.flushes - before.flushes, 1);
    assert_eq!(h.zilog.commit_seq(), last);
    assert_eq!(h.zilog.pending_len(), 0);
    assert_eq!(h.zilog.stats().itx_copied_count, 3);
}

#[test]
fn test_committed_writes_are_replayed_after_crash() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let writes = vec![
        (FILE_A, 0, b"alpha".to_vec()),
        (FILE_A, 5, b"bravo".to_vec()),
        (FILE_A, 10, b"charlie".to_vec()),
    ];
    let mut seq = 0;
    for (file_id, offset, data) in &writes {
        seq = h.write(*file_id, *offset, data);
    }
    h.zilog.commit(seq, FILE_A);
    assert!(h.dataset.durable_files().is_empty());

    let (imported, outcome) = h.crash().import();
    assert!(outcome.claimed);
    assert!(outcome.replay_needed);
    assert_eq!(outcome.records, 3);
    assert!(imported.header.lock().replay_needed());

    let report = imported
        .zilog
        .replay(&imported.dataset.replay_table())
        .unwrap();
    assert_eq!(report.records_replayed, 3);
    assert_eq!(imported.dataset.files(), expected(&writes));
    assert_eq!(imported.dataset.durable_files(), expected(&writes));

    let header = imported.header.lock();
    assert!(!header.replay_needed());
    assert!(header.is_empty());
}

#[test]
fn test_deferred_writes_survive_crash() {
    let h = Harness::new(ZilConfig::small_blocks());
    h.warm_up();
    let writes = vec![
        (1, 0, data(1, 300)),
        (1, 300, data(2, 2000)),
        (2, 0, data(3, 700)),
    ];
    h.write_as(1, 0, &writes[0].2, WriteState::NeedCopy);
    h.write_as(1, 300, &writes[1].2, WriteState::NeedCopy);
    let seq = h.write_as(2, 0, &writes[2].2, WriteState::Indirect);
    h.zilog.commit(seq, 0);
    assert_eq!(h.zilog.commit_seq(), seq);

    let (imported, _) = h.crash().import();
    imported
        .zilog
        .replay(&imported.dataset.replay_table())
        .unwrap();
    assert_eq!(imported.dataset.files(), expected(&writes));
}

#[test]
fn test_reopen_appends_to_the_same_chain() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let seq = h.write(FILE_A, 0, b"before close");
    h.zilog.commit(seq, FILE_A);
    h.zilog.close().unwrap();
    assert!(h.zilog.is_closed());
    let err = h
        .zilog
        .submit(Itx::new(TxType::Create, h.epochs.current_epoch(), 1, Vec::new()))
        .unwrap_err();
    assert!(matches!(err, Error::Closed));

    let head = h.header.lock().head;
    assert!(!head.is_hole());
    assert!(h.store.is_allocated(&head));

    let zilog = IntentLog::builder()
        .objset(OBJSET)
        .header(h.header.clone())
        .open(h.store.clone(), h.epochs.clone(), h.dataset.clone())
        .unwrap();
    let allocs = h.store.stats().allocs;
    let seq = h.dataset.write(&zilog, FILE_A, 0, b"after", WriteState::Copied);
    zilog.commit(seq, FILE_A);

    // The first block written after reopen is the old head; only its
    // successor is new.
    assert_eq!(h.store.stats().allocs, allocs + 1);
    assert_eq!(h.header.lock().head, head);
    assert_eq!(zilog.commit_seq(), seq);
}
