// ABOUTME: End-to-end smoke test for the full hostal store lifecycle on a real database file.
// ABOUTME: Covers migration, restart with session clearing, facade durability, and sync-queue replay.

use std::sync::Arc;

use chrono::Duration;
use hostal_core::{Cuarto, ManualClock, QueueStatus, hostal_schema};
use hostal_store::{
    AuthTokens, CollectionStore, DrainReport, JsonFileSource, LocalStore, MigrationRunner,
    StoreConfig,
};
use serde_json::json;

/// A store over the database in `config`, as a fresh process would open it.
fn boot(config: &StoreConfig, clock: &ManualClock) -> LocalStore {
    let collections = CollectionStore::open_file(config.database_path(), hostal_schema());
    LocalStore::new(collections, Arc::new(clock.clone()), config.clone())
}

#[tokio::test]
async fn smoke_test_full_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig::with_home(dir.path().join("data"));
    let clock = ManualClock::default();

    // 1. First start: open and import legacy data
    let legacy_path = dir.path().join("legacy.json");
    std::fs::write(
        &legacy_path,
        serde_json::to_string(&json!({
            "theme": "dark",
            "user": "{\"id\": 1, \"rol\": \"recepcion\"}",
            "cuartos": "[{\"id\": 101, \"edificio_id\": 1, \"estado\": \"libre\"},\
                         {\"id\": 102, \"edificio_id\": 1, \"estado\": \"ocupado\"}]"
        }))
        .unwrap(),
    )
    .unwrap();

    let store = boot(&config, &clock);
    store.open().await.unwrap();
    assert!(config.database_path().exists());

    let source = JsonFileSource::load(&legacy_path).unwrap();
    let report = MigrationRunner::new(store.clone()).run(&source).await.unwrap();
    assert!(report.completed);
    assert_eq!(report.imported, vec!["user", "theme", "cuartos"]);

    // 2. Log in without "remember me" and queue offline edits
    store
        .save_auth_tokens(
            &AuthTokens {
                access_token: "acc".into(),
                refresh_token: Some("ref".into()),
                token_type: Some("Bearer".into()),
                expires_in: Some(3600),
                sesion_id: None,
            },
            false,
        )
        .await
        .unwrap();
    assert!(store.has_active_session().await.unwrap());

    for (room, estado) in [(101, "limpieza"), (102, "libre"), (101, "libre")] {
        store
            .add_to_sync_queue(
                "cuarto.estado",
                &format!("/api/cuartos/{}", room),
                "PATCH",
                json!({ "estado": estado }),
            )
            .await
            .unwrap();
    }

    // 3. Facade writes are durable once flushed
    let facade = store.facade().await.unwrap();
    assert_eq!(facade.read("theme"), Some(json!("dark")));
    facade.write("language", json!("es")).unwrap();
    facade.flush().await.unwrap();

    drop(facade);
    drop(store);

    // 4. Restart: session credentials are gone, everything else survives
    let store = boot(&config, &clock);
    store.open().await.unwrap();

    assert!(!store.has_active_session().await.unwrap());
    assert_eq!(store.get_user().await.unwrap().unwrap()["rol"], json!("recepcion"));
    assert_eq!(
        store.cache().get_cache_value("language").await.unwrap(),
        Some(json!("es"))
    );
    let libres: Vec<Cuarto> = store.get_cuartos_by_estado("libre").await.unwrap();
    assert_eq!(libres.iter().map(|c| c.id).collect::<Vec<_>>(), vec![101]);

    // A second migration run changes nothing
    let again = MigrationRunner::new(store.clone()).run(&source).await.unwrap();
    assert!(again.already_migrated);

    // 5. Replay the queue; the second entry fails
    let report = store
        .drain_sync_queue(|entry| async move {
            if entry.endpoint.ends_with("/102") {
                Err("409 conflict".to_string())
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
    assert_eq!(
        report,
        DrainReport {
            succeeded: 2,
            failed: 1,
            dead_lettered: 0,
            total: 3
        }
    );

    let pending = store.queue().list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].endpoint, "/api/cuartos/102");
    assert_eq!(pending[0].retries, 1);

    // 6. Retention: old completed entries are pruned exactly once
    clock.advance(Duration::days(config.queue_retention_days + 1));
    assert_eq!(store.prune_sync_queue().await.unwrap(), 2);
    assert_eq!(store.prune_sync_queue().await.unwrap(), 0);

    let remaining = store.queue().list_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, QueueStatus::Pending);

    // 7. The facade write and the migrated cuartos snapshot have both expired;
    // migrated preferences have no deadline
    assert_eq!(store.cache().sweep_expired().await.unwrap(), 2);
    assert!(store.cache().get_cache_value("language").await.unwrap().is_none());
    assert_eq!(
        store.cache().get_cache_value("theme").await.unwrap(),
        Some(json!("dark"))
    );
}
