//! SQL checkpoint store across process restarts

mod common;

use arxivist_ingest::checkpoint::{CheckpointStore, Cursor, SqlCheckpointStore};
use arxivist_ingest::config::CheckpointConfig;
use common::{fast_retry, init_tracing};
use tempfile::TempDir;

fn file_config(dir: &TempDir, setting_name: &str) -> CheckpointConfig {
    CheckpointConfig {
        database_url: format!("sqlite://{}?mode=rwc", dir.path().join("checkpoint.db").display()),
        setting_name: setting_name.to_string(),
    }
}

#[tokio::test]
async fn test_cursor_survives_reconnect() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = file_config(&dir, "last_record");

    {
        let store = SqlCheckpointStore::connect(&config, fast_retry()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        store.save(&Cursor::from("2021-01-03")).await.unwrap();
        store.save(&Cursor::from("2021-01-04")).await.unwrap();
    }

    let reopened = SqlCheckpointStore::connect(&config, fast_retry()).await.unwrap();
    assert_eq!(reopened.load().await.unwrap(), Some(Cursor::from("2021-01-04")));
}

#[tokio::test]
async fn test_settings_are_independent() {
    init_tracing();
    let dir = TempDir::new().unwrap();

    let cs = SqlCheckpointStore::connect(&file_config(&dir, "last_record_cs"), fast_retry())
        .await
        .unwrap();
    let math = SqlCheckpointStore::connect(&file_config(&dir, "last_record_math"), fast_retry())
        .await
        .unwrap();

    cs.save(&Cursor::from("2021-02-01")).await.unwrap();

    assert_eq!(cs.load().await.unwrap(), Some(Cursor::from("2021-02-01")));
    assert_eq!(math.load().await.unwrap(), None);
}
