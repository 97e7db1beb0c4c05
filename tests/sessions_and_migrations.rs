//! Embedded session discipline and migrator idempotence.

use std::time::Duration;

use ragweave::config::SqliteConfig;
use ragweave::errors::StorageError;
use ragweave::migrate;
use ragweave::sessions::SqliteSessions;

fn quick_config() -> SqliteConfig {
    SqliteConfig {
        busy_timeout: Duration::from_millis(200),
        read_pool_size: 2,
        ..SqliteConfig::in_memory()
    }
}

#[tokio::test]
async fn write_session_is_exclusive_and_bounded() {
    let sessions = SqliteSessions::open(&quick_config()).await.unwrap();

    let held = sessions.acquire_write("first writer").await.unwrap();
    let started = std::time::Instant::now();
    let err = sessions.acquire_write("second writer").await.unwrap_err();
    match err {
        StorageError::DatabaseLocked {
            operation,
            waited_ms,
        } => {
            assert_eq!(operation, "second writer");
            assert!(waited_ms >= 150, "waited only {waited_ms} ms");
        }
        other => panic!("expected DatabaseLocked, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(150));

    drop(held);
    // the writer frees up once the previous session is released
    let _reacquired = sessions.acquire_write("third writer").await.unwrap();
    sessions.close().await;
}

#[tokio::test]
async fn read_pool_is_bounded_but_coexists_with_writer() {
    let sessions = SqliteSessions::open(&quick_config()).await.unwrap();

    let _writer = sessions.acquire_write("writer").await.unwrap();
    let _r1 = sessions.acquire_read("reader 1").await.unwrap();
    let _r2 = sessions.acquire_read("reader 2").await.unwrap();

    let err = sessions.acquire_read("reader 3").await.unwrap_err();
    assert!(matches!(err, StorageError::DatabaseLocked { .. }));
    sessions.close().await;
}

#[tokio::test]
async fn migrator_is_idempotent() {
    let sessions = SqliteSessions::open(&quick_config()).await.unwrap();

    let first = migrate::migrate_sqlite(sessions.write_pool()).await.unwrap();
    assert!(first > 0);
    let version = migrate::current_version_sqlite(sessions.write_pool())
        .await
        .unwrap();

    let second = migrate::migrate_sqlite(sessions.write_pool()).await.unwrap();
    assert_eq!(second, 0);
    assert_eq!(
        migrate::current_version_sqlite(sessions.write_pool())
            .await
            .unwrap(),
        version
    );

    let versions = migrate::applied_versions_sqlite(sessions.write_pool())
        .await
        .unwrap();
    let mut sorted = versions.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(versions, sorted, "versions recorded once, ascending");
    sessions.close().await;
}

#[tokio::test]
async fn in_memory_databases_are_private_per_manager() {
    let a = SqliteSessions::open(&quick_config()).await.unwrap();
    let b = SqliteSessions::open(&quick_config()).await.unwrap();

    migrate::migrate_sqlite(a.write_pool()).await.unwrap();
    // a freshly opened manager has its own namespace with no schema yet
    let version = migrate::current_version_sqlite(b.write_pool()).await;
    assert!(version.is_err(), "second manager saw the first one's schema");

    a.close().await;
    b.close().await;
}
