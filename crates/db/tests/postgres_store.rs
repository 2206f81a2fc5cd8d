//! Store tests against a live PostgreSQL. Run with
//! `DATABASE_URL=postgres://... cargo test -p quicksync-db -- --ignored`.

use assert_matches::assert_matches;
use quicksync_core::diff::{DiffCounts, DiffType, PreviewRow};
use quicksync_core::entity::EntityState;
use quicksync_core::plan::WriteOp;
use quicksync_core::run::{EntryOutcome, MigrationMode, MigrationRun, RunEntryLog, RunFilter, RunStatus};
use quicksync_db::{EntityStore, HistoryStore, MigrationStore, PgStore, StoreError};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn insert(external_id: &str) -> WriteOp {
    WriteOp::Insert {
        entity_id: Uuid::now_v7(),
        external_id: external_id.to_string(),
        fields: json!({"name": external_id, "price": 2.5}).as_object().cloned().unwrap(),
        source_row_index: 0,
    }
}

fn pending_run() -> MigrationRun {
    let mut counts = DiffCounts::default();
    counts.record(DiffType::New);
    MigrationRun::pending(
        "venue-1",
        "marketman",
        "inventory_item",
        MigrationMode::Migrate,
        "items.csv",
        counts,
    )
}

/// Record a pending run and return it completed, ready to commit.
async fn completable_run(store: &PgStore) -> MigrationRun {
    let mut run = pending_run();
    store.record(&run, &[]).await.unwrap();
    run.complete("Imported 1 new".into()).unwrap();
    run
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_round_trip(pool: PgPool) {
    quicksync_db::health_check(&pool).await.unwrap();
    let store = PgStore::new(pool);
    let run = completable_run(&store).await;
    let op = insert("A");

    store
        .commit("venue-1", "inventory_item", &[op.clone()], &run, &[])
        .await
        .unwrap();
    let snapshot = store.snapshot("venue-1", "inventory_item").await.unwrap();
    let a = snapshot.get("A").unwrap();
    assert_eq!(Some(a.id), op.inserted_id());
    assert_eq!(a.state, EntityState::Active);
    assert_eq!(a.revision, 1);
    assert_eq!(a.last_run_id, Some(run.run_id));
    assert_eq!(
        store.get("venue-1", run.run_id).await.unwrap().unwrap().status,
        RunStatus::Completed
    );

    let next = completable_run(&store).await;
    let outcome = store
        .commit(
            "venue-1",
            "inventory_item",
            &[WriteOp::Patch {
                external_id: "A".into(),
                changes: json!({"unit": "kg"}).as_object().cloned().unwrap(),
                base_revision: Some(1),
                source_row_index: 0,
            }],
            &next,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(outcome.writes[0].revision, 2);

    let snapshot = store.snapshot("venue-1", "inventory_item").await.unwrap();
    let a = snapshot.get("A").unwrap();
    assert_eq!(a.fields["unit"], json!("kg"));
    assert_eq!(a.fields["price"], json!(2.5));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_rejected_commit_rolls_back_writes_and_run(pool: PgPool) {
    let store = PgStore::new(pool);
    let run = completable_run(&store).await;
    let result = store
        .commit("venue-1", "inventory_item", &[insert("A"), insert("A")], &run, &[])
        .await;
    assert_matches!(result, Err(StoreError::Rejected { .. }));
    assert!(store.snapshot("venue-1", "inventory_item").await.unwrap().is_empty());
    assert_eq!(
        store.get("venue-1", run.run_id).await.unwrap().unwrap().status,
        RunStatus::Pending
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_commit_of_settled_run_writes_nothing(pool: PgPool) {
    let store = PgStore::new(pool);
    let run = completable_run(&store).await;
    store.commit("venue-1", "inventory_item", &[], &run, &[]).await.unwrap();

    assert_matches!(
        store.commit("venue-1", "inventory_item", &[insert("B")], &run, &[]).await,
        Err(StoreError::RunFinalized { status: RunStatus::Completed, .. })
    );
    assert!(store.snapshot("venue-1", "inventory_item").await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_history_ledger(pool: PgPool) {
    let history = PgStore::new(pool);
    let mut run = pending_run();
    let preview = vec![PreviewRow {
        source_row_index: 0,
        external_id: "A".into(),
        entry_type: DiffType::New,
        changed_fields: Vec::new(),
        base_revision: None,
    }];
    history.record(&run, &preview).await.unwrap();
    assert_eq!(history.preview(run.run_id).await.unwrap(), preview);

    run.complete("Imported 1 new".into()).unwrap();
    let log = RunEntryLog {
        run_id: run.run_id,
        source_row_index: 0,
        external_id: "A".into(),
        entry_type: DiffType::New,
        outcome: EntryOutcome::Inserted,
        entity_id: None,
    };
    history.finalize(&run, &[log.clone()]).await.unwrap();
    assert_matches!(
        history.finalize(&run, &[]).await,
        Err(StoreError::RunFinalized { .. })
    );

    let stored = history.get("venue-1", run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.counts.new, 1);
    assert_eq!(history.entries(run.run_id).await.unwrap(), vec![log]);

    let listed = history
        .list("venue-1", &RunFilter { limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
