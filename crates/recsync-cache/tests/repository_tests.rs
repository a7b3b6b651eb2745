//! Integration tests for SqliteLedgerRepository and SqlitePreferenceStore
//!
//! These tests exercise the ledger port against an in-memory SQLite
//! database. Each test function creates a fresh database to ensure test
//! isolation.

use recsync_cache::{DatabasePool, SqliteLedgerRepository, SqlitePreferenceStore};
use recsync_core::domain::{ChangeState, OperationId, PendingRelationship, RelationshipKey};
use recsync_core::ports::{
    EntityFilter, EntityVersions, ILedgerRepository, IPreferenceStore, LedgerBatch, LedgerError,
    LedgerOp,
};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory ledger for each test
async fn setup() -> (DatabasePool, SqliteLedgerRepository) {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let repo = SqliteLedgerRepository::new(pool.pool().clone());
    (pool, repo)
}

fn suit_pilot_edge(targets: &[&str]) -> PendingRelationship {
    PendingRelationship::new(
        RelationshipKey::new("Suit", "s1", "pilot").unwrap(),
        "Pilot",
        targets.iter().map(|t| t.to_string()).collect(),
    )
}

// ============================================================================
// Entity operations
// ============================================================================

#[tokio::test]
async fn test_upsert_and_find() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();

    let entity = repo.find("p1").await.unwrap().expect("entity exists");
    assert_eq!(entity.type_name(), "Pilot");
    assert_eq!(entity.change_state(), ChangeState::New);
    assert!(!entity.is_deleted());
    assert!(entity.modified_time().is_some());

    assert!(repo.find("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_overwrites_state_and_clears_tombstone() {
    let (_pool, repo) = setup().await;

    repo.apply(LedgerBatch::from(vec![LedgerOp::Tombstone {
        type_name: "Pilot".to_string(),
        identifier: "p1".to_string(),
    }]))
    .await
    .unwrap();
    assert!(repo.find("p1").await.unwrap().unwrap().is_deleted());

    repo.upsert("Pilot", "p1", ChangeState::Changed).await.unwrap();

    let entity = repo.find("p1").await.unwrap().unwrap();
    assert_eq!(entity.change_state(), ChangeState::Changed);
    assert!(!entity.is_deleted());
}

#[tokio::test]
async fn test_insert_if_absent_is_idempotent() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::Synced).await.unwrap();

    let batch = || {
        LedgerBatch::from(vec![
            LedgerOp::InsertIfAbsent {
                type_name: "Pilot".to_string(),
                identifier: "p1".to_string(),
                state: ChangeState::New,
            },
            LedgerOp::InsertIfAbsent {
                type_name: "Pilot".to_string(),
                identifier: "p2".to_string(),
                state: ChangeState::New,
            },
        ])
    };
    repo.apply(batch()).await.unwrap();
    repo.apply(batch()).await.unwrap();

    let all = repo.find_all(&EntityFilter::new()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        repo.find("p1").await.unwrap().unwrap().change_state(),
        ChangeState::Synced
    );
    assert_eq!(
        repo.find("p2").await.unwrap().unwrap().change_state(),
        ChangeState::New
    );
}

#[tokio::test]
async fn test_find_all_filters_by_state_and_type() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();
    repo.upsert("Pilot", "p2", ChangeState::Changed).await.unwrap();
    repo.upsert("Pilot", "p3", ChangeState::Synced).await.unwrap();
    repo.upsert("Suit", "s1", ChangeState::New).await.unwrap();

    let pending = repo
        .find_all(&EntityFilter::new().with_states([ChangeState::New, ChangeState::Changed]))
        .await
        .unwrap();
    let ids: Vec<_> = pending.iter().map(|e| e.identifier()).collect();
    assert_eq!(ids, vec!["p1", "p2", "s1"]);

    let pilots = repo
        .find_all(
            &EntityFilter::new()
                .with_states([ChangeState::New, ChangeState::Changed])
                .with_type("Pilot"),
        )
        .await
        .unwrap();
    assert_eq!(pilots.len(), 2);

    let all = repo.find_all(&EntityFilter::new()).await.unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_mark_synced_only_touches_listed_identifiers() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();
    repo.upsert("Pilot", "p2", ChangeState::Changed).await.unwrap();

    repo.mark_synced(&EntityVersions::from([
        ("p1".to_string(), 0),
        ("unknown".to_string(), 0),
    ]))
    .await
    .unwrap();

    assert_eq!(
        repo.find("p1").await.unwrap().unwrap().change_state(),
        ChangeState::Synced
    );
    assert_eq!(
        repo.find("p2").await.unwrap().unwrap().change_state(),
        ChangeState::Changed
    );
    assert!(repo.find("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mark_deleted_tombstones() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::Deleted).await.unwrap();
    repo.mark_deleted(&EntityVersions::from([("p1".to_string(), 0)]))
        .await
        .unwrap();

    let entity = repo.find("p1").await.unwrap().unwrap();
    assert!(entity.is_deleted());
    assert_eq!(entity.change_state(), ChangeState::Synced);
    assert!(entity.is_purgeable());
}

#[tokio::test]
async fn test_count_by_state() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();
    repo.upsert("Pilot", "p2", ChangeState::New).await.unwrap();
    repo.upsert("Pilot", "p3", ChangeState::Synced).await.unwrap();

    let counts = repo.count_by_state().await.unwrap();
    assert_eq!(counts.get(&ChangeState::New), Some(&2));
    assert_eq!(counts.get(&ChangeState::Synced), Some(&1));
    assert_eq!(counts.get(&ChangeState::Changed), None);
}

// ============================================================================
// Upload settlement
// ============================================================================

#[tokio::test]
async fn test_writes_advance_generation() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();
    assert_eq!(repo.find("p1").await.unwrap().unwrap().generation(), 0);

    repo.upsert("Pilot", "p1", ChangeState::Changed).await.unwrap();
    assert_eq!(repo.find("p1").await.unwrap().unwrap().generation(), 1);

    repo.mark_synced(&EntityVersions::from([("p1".to_string(), 1)]))
        .await
        .unwrap();
    let entity = repo.find("p1").await.unwrap().unwrap();
    assert_eq!(entity.change_state(), ChangeState::Synced);
    assert_eq!(entity.generation(), 1);
}

#[tokio::test]
async fn test_settle_upload_requires_current_generation() {
    let (_pool, repo) = setup().await;
    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();
    repo.upsert("Pilot", "p1", ChangeState::New).await.unwrap();

    let settle = |generation| {
        LedgerBatch::from(vec![LedgerOp::SettleUpload {
            identifier: "p1".to_string(),
            generation,
        }])
    };

    repo.apply(settle(0)).await.unwrap();
    assert_eq!(
        repo.find("p1").await.unwrap().unwrap().change_state(),
        ChangeState::New
    );

    repo.apply(settle(1)).await.unwrap();
    assert_eq!(
        repo.find("p1").await.unwrap().unwrap().change_state(),
        ChangeState::Synced
    );
}

#[tokio::test]
async fn test_settle_deletion_only_matches_deleted_entries() {
    let (_pool, repo) = setup().await;
    repo.upsert("Pilot", "p1", ChangeState::Changed).await.unwrap();

    repo.apply(LedgerBatch::from(vec![LedgerOp::SettleDeletion {
        identifier: "p1".to_string(),
        generation: 0,
    }]))
    .await
    .unwrap();
    let entity = repo.find("p1").await.unwrap().unwrap();
    assert_eq!(entity.change_state(), ChangeState::Changed);
    assert!(!entity.is_deleted());

    repo.upsert("Pilot", "p1", ChangeState::Deleted).await.unwrap();
    repo.apply(LedgerBatch::from(vec![LedgerOp::SettleDeletion {
        identifier: "p1".to_string(),
        generation: 1,
    }]))
    .await
    .unwrap();
    let entity = repo.find("p1").await.unwrap().unwrap();
    assert_eq!(entity.change_state(), ChangeState::Synced);
    assert!(entity.is_deleted());
}

#[tokio::test]
async fn test_push_snapshot_roundtrip() {
    let (_pool, repo) = setup().await;
    let operation = OperationId::new("op-1".to_string()).unwrap();
    let versions = EntityVersions::from([("p1".to_string(), 3), ("p2".to_string(), 0)]);

    repo.apply(LedgerBatch::from(vec![LedgerOp::RecordPush {
        operation: operation.clone(),
        versions: versions.clone(),
    }]))
    .await
    .unwrap();
    assert_eq!(repo.push_snapshot(&operation).await.unwrap(), versions);

    let other = OperationId::new("op-2".to_string()).unwrap();
    assert!(repo.push_snapshot(&other).await.unwrap().is_empty());

    repo.apply(LedgerBatch::from(vec![LedgerOp::ForgetPush {
        operation: operation.clone(),
    }]))
    .await
    .unwrap();
    assert!(repo.push_snapshot(&operation).await.unwrap().is_empty());
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_failed_batch_leaves_no_partial_writes() {
    let (pool, repo) = setup().await;

    sqlx::raw_sql(
        "CREATE TRIGGER reject_boom BEFORE INSERT ON synced_entities \
         WHEN NEW.identifier = 'boom' \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .execute(pool.pool())
    .await
    .unwrap();

    let batch = LedgerBatch::from(vec![
        LedgerOp::Upsert {
            type_name: "Pilot".to_string(),
            identifier: "p1".to_string(),
            state: ChangeState::New,
        },
        LedgerOp::Upsert {
            type_name: "Pilot".to_string(),
            identifier: "boom".to_string(),
            state: ChangeState::New,
        },
    ]);

    let result = repo.apply(batch).await;
    assert!(matches!(result, Err(LedgerError::WriteFailed(_))));
    assert!(repo.find("p1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let (_pool, repo) = setup().await;
    repo.apply(LedgerBatch::new()).await.unwrap();
    assert!(repo.find_all(&EntityFilter::new()).await.unwrap().is_empty());
}

// ============================================================================
// Pending relationships
// ============================================================================

#[tokio::test]
async fn test_put_pending_replaces_same_key() {
    let (_pool, repo) = setup().await;

    repo.apply(LedgerBatch::from(vec![LedgerOp::PutPending(suit_pilot_edge(&["p9"]))]))
        .await
        .unwrap();
    repo.apply(LedgerBatch::from(vec![LedgerOp::PutPending(suit_pilot_edge(&["p7"]))]))
        .await
        .unwrap();

    let live = repo.live_relationships().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].target_identifiers(), &["p7".to_string()]);
    assert_eq!(live[0].attempts(), 0);
}

#[tokio::test]
async fn test_target_order_preserved() {
    let (_pool, repo) = setup().await;

    let edge = PendingRelationship::new(
        RelationshipKey::new("Squad", "q1", "members").unwrap(),
        "Pilot",
        vec!["p3".to_string(), "p1".to_string(), "p2".to_string()],
    );
    repo.apply(LedgerBatch::from(vec![LedgerOp::PutPending(edge.clone())]))
        .await
        .unwrap();

    let stored = repo.relationship(edge.key()).await.unwrap().unwrap();
    assert_eq!(stored, edge);
}

#[tokio::test]
async fn test_update_pending_persists_attempts_and_flags() {
    let (_pool, repo) = setup().await;

    let mut edge = suit_pilot_edge(&["p9"]);
    repo.apply(LedgerBatch::from(vec![LedgerOp::PutPending(edge.clone())]))
        .await
        .unwrap();

    edge.record_miss(100);
    edge.record_miss(100);
    repo.apply(LedgerBatch::from(vec![LedgerOp::UpdatePending(edge.clone())]))
        .await
        .unwrap();
    let stored = repo.relationship(edge.key()).await.unwrap().unwrap();
    assert_eq!(stored.attempts(), 2);
    assert!(stored.is_live());

    edge.mark_applied();
    repo.apply(LedgerBatch::from(vec![LedgerOp::UpdatePending(edge.clone())]))
        .await
        .unwrap();
    let stored = repo.relationship(edge.key()).await.unwrap().unwrap();
    assert!(stored.is_applied());
    assert!(repo.live_relationships().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalidate_pending_from_source() {
    let (_pool, repo) = setup().await;

    let other = PendingRelationship::new(
        RelationshipKey::new("Suit", "s2", "pilot").unwrap(),
        "Pilot",
        vec!["p1".to_string()],
    );
    repo.apply(LedgerBatch::from(vec![
        LedgerOp::PutPending(suit_pilot_edge(&["p9"])),
        LedgerOp::PutPending(other),
    ]))
    .await
    .unwrap();

    repo.apply(LedgerBatch::from(vec![LedgerOp::InvalidatePendingFrom {
        from_type: "Suit".to_string(),
        from_identifier: "s1".to_string(),
    }]))
    .await
    .unwrap();

    let live = repo.live_relationships().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].key().from_identifier, "s2");

    let dead = repo
        .relationship(&RelationshipKey::new("Suit", "s1", "pilot").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(dead.is_considered_dead());
}

// ============================================================================
// Cleanup sweep
// ============================================================================

#[tokio::test]
async fn test_purge_dead_or_applied() {
    let (_pool, repo) = setup().await;

    repo.upsert("Pilot", "p1", ChangeState::Synced).await.unwrap();
    repo.upsert("Pilot", "p2", ChangeState::Deleted).await.unwrap();
    repo.apply(LedgerBatch::from(vec![LedgerOp::Tombstone {
        type_name: "Pilot".to_string(),
        identifier: "p3".to_string(),
    }]))
    .await
    .unwrap();

    let mut applied = suit_pilot_edge(&["p1"]);
    applied.mark_applied();
    let mut dead = PendingRelationship::new(
        RelationshipKey::new("Suit", "s2", "pilot").unwrap(),
        "Pilot",
        vec!["p8".to_string()],
    );
    dead.mark_dead();
    let live = PendingRelationship::new(
        RelationshipKey::new("Suit", "s3", "pilot").unwrap(),
        "Pilot",
        vec!["p9".to_string()],
    );
    repo.apply(LedgerBatch::from(vec![
        LedgerOp::PutPending(applied),
        LedgerOp::PutPending(dead),
        LedgerOp::PutPending(live),
    ]))
    .await
    .unwrap();

    let report = repo.purge_dead_or_applied().await.unwrap();
    assert_eq!(report.entities_removed, 1);
    assert_eq!(report.relationships_removed, 2);

    assert!(repo.find("p3").await.unwrap().is_none());
    // Unacknowledged local deletion survives the sweep
    assert!(repo.find("p2").await.unwrap().is_some());
    assert_eq!(repo.live_relationships().await.unwrap().len(), 1);

    let again = repo.purge_dead_or_applied().await.unwrap();
    assert_eq!(again.entities_removed, 0);
    assert_eq!(again.relationships_removed, 0);
}

// ============================================================================
// Preferences
// ============================================================================

#[tokio::test]
async fn test_preferences_roundtrip_and_clear() {
    let (pool, _repo) = setup().await;
    let prefs = SqlitePreferenceStore::new(pool.pool().clone());

    assert_eq!(prefs.get("token").await.unwrap(), None);

    prefs.set("token", "abc").await.unwrap();
    prefs.set("token", "def").await.unwrap();
    prefs.set("flag", "true").await.unwrap();
    assert_eq!(prefs.get("token").await.unwrap().as_deref(), Some("def"));

    prefs.remove("token").await.unwrap();
    assert_eq!(prefs.get("token").await.unwrap(), None);

    prefs.clear().await.unwrap();
    assert_eq!(prefs.get("flag").await.unwrap(), None);
}
