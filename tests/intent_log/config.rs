//! Configuration files and presets

use crate::*;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn noop_data() -> Arc<dyn GetData> {
    Arc::new(|_: FetchToken, _: &mut WriteRecord, _: Option<&mut [u8]>| {
        Err::<(), _>(GetDataError::Gone)
    })
}

#[test]
fn test_config_file_drives_the_log() {
    let file = write_config(
        r#"
min_block_size = 1024
max_block_size = 8192
prev_block_window = 4
no_cache_flush = true
sync = "always"
"#,
    );
    let store = Arc::new(MemBlockStore::new());
    let epochs = Arc::new(MemEpochManager::new());
    let zilog = IntentLog::builder()
        .config_file(file.path())
        .unwrap()
        .objset(OBJSET)
        .open(store.clone(), epochs.clone(), noop_data())
        .unwrap();

    let config = zilog.config();
    assert_eq!(config.min_block_size, 1024);
    assert_eq!(config.max_block_size, 8192);
    assert_eq!(config.prev_block_window, 4);
    assert_eq!(config.sync, SyncPolicy::Always);
    assert!(!config.replay_disabled);

    // Chain creation, then a logged record.
    for payload in [b"first".to_vec(), b"second".to_vec()] {
        let itx = Itx::new(TxType::Create, epochs.current_epoch(), 1, payload);
        let seq = zilog.submit(itx).unwrap();
        zilog.commit(seq, 2);
        assert_eq!(zilog.commit_seq(), seq);
    }
    assert_eq!(store.stats().writes, 1);
    assert_eq!(store.stats().flushes, 0);
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let file = write_config("replay_disabled = true\n");
    let config = ZilConfig::load(file.path()).unwrap();
    assert!(config.replay_disabled);
    assert_eq!(config.min_block_size, ZilConfig::default().min_block_size);
    assert_eq!(config.sync, SyncPolicy::Standard);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let file = write_config("min_block_size = 3000\n");
    let err = IntentLog::builder().config_file(file.path()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let missing = file.path().with_extension("missing");
    assert!(matches!(
        IntentLog::builder().config_file(&missing),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_builder_presets() {
    let store = Arc::new(MemBlockStore::new());
    let epochs = Arc::new(MemEpochManager::new());
    let zilog = IntentLog::builder()
        .throughput()
        .sync_policy(SyncPolicy::Disabled)
        .open(store, epochs, noop_data())
        .unwrap();
    assert_eq!(zilog.config().min_block_size, 8192);
    assert!(zilog.config().no_cache_flush);
    assert_eq!(zilog.config().sync, SyncPolicy::Disabled);

    let invalid = ZilConfig {
        prev_block_window: 3,
        ..ZilConfig::default()
    };
    let result = IntentLog::builder().config(invalid).open(
        Arc::new(MemBlockStore::new()),
        Arc::new(MemEpochManager::new()),
        noop_data(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}
