#![cfg(feature = "db-tests")]
//! PostgreSQL store integration tests.
//!
//! Run against a database configured through `STRINDEX_DB_*`:
//!
//! ```text
//! cargo test -p strindex-storage --features db-tests
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use strindex_core::{KeyCollection, OrgId, UseCaseKey};
use strindex_storage::{PgConfig, PostgresStore, StringStore};

async fn test_store() -> PostgresStore {
    let store = PostgresStore::from_config(&PgConfig::from_env()).expect("pool creation should succeed");
    store.migrate().await.expect("migrate should succeed");
    store
}

/// An org id no previous run has used.
fn fresh_org_id() -> OrgId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_nanos();
    (nanos % (i64::MAX as u128)) as OrgId
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let store = test_store().await;
    store.migrate().await.expect("second migrate should succeed");
    assert!(store.health_check().await.expect("health check should succeed"));
}

#[tokio::test]
async fn test_create_lookup_reverse() {
    let store = test_store().await;
    let org_id = fresh_org_id();
    let keys: KeyCollection = vec![(org_id, "a"), (org_id, "b:with:colons")].into_iter().collect();

    let created = store
        .bulk_create_if_absent(UseCaseKey::ReleaseHealth, &keys)
        .await
        .expect("create should succeed");
    assert_eq!(created.len(), 2);

    let found = store
        .bulk_lookup(UseCaseKey::ReleaseHealth, &keys)
        .await
        .expect("lookup should succeed");
    let mut created_sorted = created.clone();
    let mut found_sorted = found;
    created_sorted.sort_by(|a, b| a.string.cmp(&b.string));
    found_sorted.sort_by(|a, b| a.string.cmp(&b.string));
    assert_eq!(created_sorted, found_sorted);

    for result in &created {
        let id = result.id.expect("created id");
        let string = store
            .reverse_lookup(UseCaseKey::ReleaseHealth, id)
            .await
            .expect("reverse lookup should succeed");
        assert_eq!(string.as_deref(), Some(result.string.as_str()));

        let single = store
            .lookup(UseCaseKey::ReleaseHealth, org_id, &result.string)
            .await
            .expect("lookup should succeed");
        assert_eq!(single, Some(id));
    }
}

#[tokio::test]
async fn test_concurrent_creation_converges() {
    let store = Arc::new(test_store().await);
    let org_id = fresh_org_id();
    let keys: KeyCollection = (0..20).map(|i| (org_id, format!("tag-{}", i))).collect();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let keys = keys.clone();
        handles.push(tokio::spawn(async move {
            let mut results = store
                .bulk_create_if_absent(UseCaseKey::Performance, &keys)
                .await
                .expect("create should succeed");
            results.sort_by(|a, b| a.string.cmp(&b.string));
            results
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("task should not panic"));
    }
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_touch_only_stale_and_purge_keeps_recent() {
    let store = test_store().await;
    let org_id = fresh_org_id();
    let keys: KeyCollection = vec![(org_id, "stale")].into_iter().collect();
    store
        .bulk_create_if_absent(UseCaseKey::ReleaseHealth, &keys)
        .await
        .expect("create should succeed");

    // Fresh keys are not re-touched.
    let touched = store
        .touch(UseCaseKey::ReleaseHealth, &keys, Utc::now(), Duration::from_secs(3600))
        .await
        .expect("touch should succeed");
    assert_eq!(touched, 0);

    let later = Utc::now() + chrono::Duration::hours(2);
    let touched = store
        .touch(UseCaseKey::ReleaseHealth, &keys, later, Duration::from_secs(3600))
        .await
        .expect("touch should succeed");
    assert_eq!(touched, 1);

    // Nothing was last seen a decade ago.
    let purged = store
        .purge_stale(UseCaseKey::ReleaseHealth, Utc::now() - chrono::Duration::days(3650))
        .await
        .expect("purge should succeed");
    assert_eq!(purged, 0);
    assert!(store
        .lookup(UseCaseKey::ReleaseHealth, org_id, "stale")
        .await
        .expect("lookup should succeed")
        .is_some());
}
