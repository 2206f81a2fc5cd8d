use assert_matches::assert_matches;
use quicksync_core::diff::{DiffCounts, DiffType, PreviewRow};
use quicksync_core::entity::{EntityState, StoredEntity};
use quicksync_core::plan::WriteOp;
use quicksync_core::run::{
    EntryOutcome, MigrationMode, MigrationRun, RunEntryLog, RunFailure, RunFilter, RunStatus,
};
use quicksync_core::types::FieldMap;
use quicksync_db::{EntityStore, HistoryStore, MemoryStore, MigrationStore, StoreError};
use serde_json::json;
use uuid::Uuid;

const TENANT: &str = "venue-1";
const ITEMS: &str = "inventory_item";

fn fields(value: serde_json::Value) -> FieldMap {
    value.as_object().cloned().unwrap()
}

fn insert(external_id: &str, index: usize) -> WriteOp {
    WriteOp::Insert {
        entity_id: Uuid::now_v7(),
        external_id: external_id.to_string(),
        fields: fields(json!({"name": external_id})),
        source_row_index: index,
    }
}

fn entity(external_id: &str, state: EntityState) -> StoredEntity {
    StoredEntity {
        id: Uuid::now_v7(),
        external_id: external_id.to_string(),
        state,
        fields: fields(json!({"name": external_id, "price": 1.0})),
        revision: 4,
        last_run_id: None,
        updated_at: chrono::Utc::now(),
    }
}

fn log(run: &MigrationRun, external_id: &str, index: usize) -> RunEntryLog {
    RunEntryLog {
        run_id: run.run_id,
        source_row_index: index,
        external_id: external_id.into(),
        entry_type: DiffType::New,
        outcome: EntryOutcome::Inserted,
        entity_id: Some(Uuid::now_v7()),
    }
}

fn pending_run(tenant: &str, provider: &str) -> MigrationRun {
    let mut counts = DiffCounts::default();
    counts.record(DiffType::New);
    MigrationRun::pending(tenant, provider, ITEMS, MigrationMode::Migrate, "items.csv", counts)
}

#[tokio::test]
async fn commit_applies_batch_and_completes_run() {
    let store = MemoryStore::new();
    store.seed(TENANT, ITEMS, [entity("A", EntityState::Archived)]).await;
    let mut run = pending_run(TENANT, "marketman");
    store.record(&run, &[]).await.unwrap();
    run.complete("Restored 1; imported 1 new".into()).unwrap();
    let logs = [log(&run, "B", 0)];

    let outcome = store
        .commit(
            TENANT,
            ITEMS,
            &[
                WriteOp::Restore {
                    external_id: "A".into(),
                    from: EntityState::Archived,
                    changes: fields(json!({"price": 2.0})),
                    base_revision: Some(4),
                    source_row_index: 1,
                },
                insert("B", 0),
            ],
            &run,
            &logs,
        )
        .await
        .unwrap();

    assert_eq!(outcome.restored, 1);
    assert_eq!(outcome.inserted, 1);

    let a = store.entity(TENANT, ITEMS, "A").await.unwrap();
    assert_eq!(a.state, EntityState::Active);
    assert_eq!(a.revision, 5);
    assert_eq!(a.fields["price"], json!(2.0));
    assert_eq!(a.fields["name"], json!("A"));
    assert_eq!(a.last_run_id, Some(run.run_id));

    let b = store.entity(TENANT, ITEMS, "B").await.unwrap();
    assert_eq!(b.revision, 1);

    let stored = store.get(TENANT, run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(store.entries(run.run_id).await.unwrap(), logs.to_vec());
}

#[tokio::test]
async fn rejected_op_leaves_entities_and_run_untouched() {
    let store = MemoryStore::new();
    store.seed(TENANT, ITEMS, [entity("A", EntityState::Active)]).await;
    let mut run = pending_run(TENANT, "marketman");
    store.record(&run, &[]).await.unwrap();
    run.complete("Imported 1 new; updated 1".into()).unwrap();

    let result = store
        .commit(
            TENANT,
            ITEMS,
            &[
                insert("B", 0),
                WriteOp::Patch {
                    external_id: "A".into(),
                    changes: fields(json!({"unit": "kg"})),
                    base_revision: Some(3),
                    source_row_index: 1,
                },
            ],
            &run,
            &[log(&run, "B", 0)],
        )
        .await;

    assert_matches!(result, Err(StoreError::Rejected { external_id, .. }) if external_id == "A");
    assert!(store.entity(TENANT, ITEMS, "B").await.is_none());
    assert_eq!(store.entity(TENANT, ITEMS, "A").await.unwrap().revision, 4);
    let stored = store.get(TENANT, run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Pending);
    assert!(store.entries(run.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn commit_of_settled_run_writes_nothing() {
    let store = MemoryStore::new();
    let run = pending_run(TENANT, "marketman");
    store.record(&run, &[]).await.unwrap();

    let mut failed = run.clone();
    failed
        .fail(RunFailure {
            external_id: "B".into(),
            reason: "refused".into(),
        })
        .unwrap();
    store.finalize(&failed, &[]).await.unwrap();

    let mut completed = run.clone();
    completed.complete("Imported 1 new".into()).unwrap();
    assert_matches!(
        store
            .commit(TENANT, ITEMS, &[insert("B", 0)], &completed, &[log(&completed, "B", 0)])
            .await,
        Err(StoreError::RunFinalized { status: RunStatus::Failed, .. })
    );
    assert!(store.entity(TENANT, ITEMS, "B").await.is_none());
    assert_eq!(
        store.get(TENANT, run.run_id).await.unwrap().unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn commit_of_unrecorded_run_is_not_found() {
    let store = MemoryStore::new();
    let mut run = pending_run(TENANT, "marketman");
    run.complete("Imported 1 new".into()).unwrap();
    assert_matches!(
        store.commit(TENANT, ITEMS, &[insert("B", 0)], &run, &[]).await,
        Err(StoreError::RunNotFound(_))
    );
    assert!(store.entity(TENANT, ITEMS, "B").await.is_none());
}

#[tokio::test]
async fn snapshot_is_scoped_to_tenant_and_type() {
    let store = MemoryStore::new();
    store.seed(TENANT, ITEMS, [entity("A", EntityState::Active)]).await;
    store.seed("venue-2", ITEMS, [entity("Z", EntityState::Active)]).await;
    store.seed(TENANT, "employee", [entity("E", EntityState::Active)]).await;

    let snapshot = store.snapshot(TENANT, ITEMS).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.get("A").is_some());
    assert!(store.snapshot("venue-3", ITEMS).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_is_finalized_exactly_once() {
    let history = MemoryStore::new();
    let mut run = pending_run(TENANT, "marketman");
    history.record(&run, &[]).await.unwrap();
    assert_matches!(history.record(&run, &[]).await, Err(StoreError::DuplicateRun(_)));

    run.complete("Imported 1 new".into()).unwrap();
    let log = RunEntryLog {
        run_id: run.run_id,
        source_row_index: 0,
        external_id: "A".into(),
        entry_type: DiffType::New,
        outcome: EntryOutcome::Inserted,
        entity_id: Some(Uuid::now_v7()),
    };
    history.finalize(&run, &[log.clone()]).await.unwrap();

    let stored = history.get(TENANT, run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(history.entries(run.run_id).await.unwrap(), vec![log]);

    let mut again = stored.clone();
    again.status = RunStatus::Pending;
    again
        .fail(RunFailure {
            external_id: "A".into(),
            reason: "late".into(),
        })
        .unwrap();
    assert_matches!(
        history.finalize(&again, &[]).await,
        Err(StoreError::RunFinalized { status: RunStatus::Completed, .. })
    );
}

#[tokio::test]
async fn preview_rows_are_kept_with_the_run() {
    let history = MemoryStore::new();
    let run = pending_run(TENANT, "marketman");
    let preview = vec![PreviewRow {
        source_row_index: 0,
        external_id: "A".into(),
        entry_type: DiffType::Conflict,
        changed_fields: vec!["price".into()],
        base_revision: Some(4),
    }];
    history.record(&run, &preview).await.unwrap();
    assert_eq!(history.preview(run.run_id).await.unwrap(), preview);
    assert_matches!(history.preview(Uuid::now_v7()).await, Err(StoreError::RunNotFound(_)));
}

#[tokio::test]
async fn finalize_unknown_run_is_not_found() {
    let history = MemoryStore::new();
    let run = pending_run(TENANT, "toast");
    assert_matches!(history.finalize(&run, &[]).await, Err(StoreError::RunNotFound(_)));
}

#[tokio::test]
async fn get_hides_other_tenants_runs() {
    let history = MemoryStore::new();
    let run = pending_run(TENANT, "toast");
    history.record(&run, &[]).await.unwrap();
    assert!(history.get("venue-2", run.run_id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() {
    let history = MemoryStore::new();
    let mut ids = Vec::new();
    for (i, provider) in ["marketman", "toast", "marketman"].iter().enumerate() {
        let mut run = pending_run(TENANT, provider);
        run.started_at = chrono::Utc::now() + chrono::Duration::seconds(i as i64);
        history.record(&run, &[]).await.unwrap();
        ids.push(run.run_id);
    }
    history.record(&pending_run("venue-2", "marketman"), &[]).await.unwrap();

    let all = history
        .list(TENANT, &RunFilter { limit: 25, ..Default::default() })
        .await
        .unwrap();
    let listed: Vec<Uuid> = all.iter().map(|r| r.run_id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let marketman = history
        .list(
            TENANT,
            &RunFilter {
                provider: Some("marketman".into()),
                limit: 25,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(marketman.len(), 2);

    let page = history
        .list(TENANT, &RunFilter { limit: 1, offset: 1, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(page[0].run_id, ids[1]);

    let completed = history
        .list(
            TENANT,
            &RunFilter {
                status: Some(RunStatus::Completed),
                limit: 25,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(completed.is_empty());
}
