//! Allocation and I/O failures fall back to the checkpoint

use crate::*;

#[test]
fn test_alloc_failure_loses_no_committed_write() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    h.store.fail_allocs_after(0);

    let writes: Vec<_> = (0..5u64).map(|i| (3, i * 100, data(i as u8, 100))).collect();
    let mut seq = 0;
    for (file_id, offset, data) in &writes {
        seq = h.write(*file_id, *offset, data);
    }
    h.zilog.commit(seq, 3);

    let stats = h.zilog.stats();
    assert_eq!(h.zilog.commit_seq(), seq);
    assert_eq!(stats.lwb_alloc_failures, 1);
    assert_eq!(stats.fallback_syncs, 1);
    // The fallback waited for the checkpoint, so the writes are durable
    // without the log.
    assert_eq!(h.dataset.durable_files(), expected(&writes));
    assert!(h.header.lock().head.is_hole());

    let (imported, outcome) = h.crash().import();
    assert!(!outcome.replay_needed);
    imported
        .zilog
        .replay(&imported.dataset.replay_table())
        .unwrap();
    assert_eq!(imported.dataset.files(), expected(&writes));
    assert_eq!(imported.store.stats().bad_frees, 0);
}

#[test]
fn test_log_writes_resume_once_space_returns() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    h.store.fail_allocs_after(0);
    let seq = h.write(1, 0, b"no space");
    h.zilog.commit(seq, 1);
    assert_eq!(h.zilog.stats().fallback_syncs, 1);

    h.store.clear_alloc_failures();
    // Rebuilds the chain; the write is checkpointed while doing so.
    let seq = h.write(1, 0, b"space again");
    h.zilog.commit(seq, 1);

    let writes = h.store.stats().writes;
    let seq = h.write(1, 0, b"logged");
    h.zilog.commit(seq, 1);
    assert_eq!(h.store.stats().writes, writes + 1);
    assert_eq!(h.zilog.commit_seq(), seq);
    assert_eq!(h.zilog.stats().fallback_syncs, 1);
}

#[test]
fn test_write_error_keeps_commits_durable() {
    let h = Harness::new(ZilConfig::default());
    h.warm_up();
    let mut writes = Vec::new();

    h.store.fail_next_writes(1);
    writes.push((4, 0, b"failed block".to_vec()));
    let seq = h.write(4, 0, b"failed block");
    h.zilog.commit(seq, 4);
    assert_eq!(h.zilog.commit_seq(), seq);
    assert_eq!(h.dataset.durable_files(), expected(&writes));

    // The next commit is satisfied by a checkpoint and clears the error.
    writes.push((4, 12, b"checkpointed".to_vec()));
    let seq = h.write(4, 12, b"checkpointed");
    let block_writes = h.store.stats().writes;
    h.zilog.commit(seq, 4);
    assert_eq!(h.store.stats().writes, block_writes);
    assert_eq!(h.zilog.stats().fallback_syncs, 2);
    assert_eq!(h.dataset.durable_files(), expected(&writes));

    writes.push((4, 24, b"logged again".to_vec()));
    let seq = h.write(4, 24, b"logged again");
    h.zilog.commit(seq, 4);
    assert_eq!(h.zilog.commit_seq(), seq);

    let (imported, _) = h.crash().import();
    imported
        .zilog
        .replay(&imported.dataset.replay_table())
        .unwrap();
    assert_eq!(imported.dataset.files(), expected(&writes));
}
