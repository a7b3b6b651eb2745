//! SQLite implementation of ILedgerRepository
//!
//! This module provides the concrete SQLite-based ledger behind the
//! `ILedgerRepository` port defined in recsync-core. Every `LedgerBatch` is
//! applied inside one SQL transaction; a failing statement rolls the whole
//! batch back.
//!
//! ## Type Mapping
//!
//! | Domain Type          | SQL Type | Strategy                                   |
//! |----------------------|----------|--------------------------------------------|
//! | ChangeState          | TEXT     | `as_str()` / `FromStr`                     |
//! | bool flags           | INTEGER  | 0 / 1                                      |
//! | DateTime<Utc>        | TEXT     | ISO 8601 via `to_rfc3339()`                |
//! | target identifiers   | TEXT     | serde_json array of strings (order kept)   |

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use recsync_core::domain::{
    ChangeState, OperationId, PendingRelationship, RelationshipKey, SyncedEntity,
};
use recsync_core::ports::{
    EntityFilter, EntityVersions, ILedgerRepository, LedgerBatch, LedgerError, LedgerOp,
    PurgeReport,
};

use crate::CacheError;

/// SQLite-based implementation of the ledger repository port
pub struct SqliteLedgerRepository {
    pool: SqlitePool,
}

impl SqliteLedgerRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn apply_op(
        tx: &mut Transaction<'_, Sqlite>,
        op: LedgerOp,
        now: &str,
    ) -> Result<(), CacheError> {
        match op {
            LedgerOp::Upsert {
                type_name,
                identifier,
                state,
            } => {
                sqlx::query(
                    "INSERT INTO synced_entities \
                     (identifier, type_name, change_state, is_deleted, modified_time) \
                     VALUES (?, ?, ?, 0, ?) \
                     ON CONFLICT(identifier) DO UPDATE SET \
                     type_name = excluded.type_name, \
                     change_state = excluded.change_state, \
                     is_deleted = 0, \
                     modified_time = excluded.modified_time, \
                     generation = synced_entities.generation + 1",
                )
                .bind(&identifier)
                .bind(&type_name)
                .bind(state.as_str())
                .bind(now)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::InsertIfAbsent {
                type_name,
                identifier,
                state,
            } => {
                sqlx::query(
                    "INSERT OR IGNORE INTO synced_entities \
                     (identifier, type_name, change_state, is_deleted, modified_time) \
                     VALUES (?, ?, ?, 0, ?)",
                )
                .bind(&identifier)
                .bind(&type_name)
                .bind(state.as_str())
                .bind(now)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::SettleUpload {
                identifier,
                generation,
            } => {
                sqlx::query(
                    "UPDATE synced_entities SET change_state = 'synced', modified_time = ? \
                     WHERE identifier = ? AND generation = ? \
                     AND change_state IN ('new', 'changed')",
                )
                .bind(now)
                .bind(&identifier)
                .bind(generation)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::SettleDeletion {
                identifier,
                generation,
            } => {
                sqlx::query(
                    "UPDATE synced_entities \
                     SET change_state = 'synced', is_deleted = 1, modified_time = ? \
                     WHERE identifier = ? AND generation = ? AND change_state = 'deleted'",
                )
                .bind(now)
                .bind(&identifier)
                .bind(generation)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::RecordPush {
                operation,
                versions,
            } => {
                for (identifier, generation) in &versions {
                    sqlx::query(
                        "INSERT OR REPLACE INTO push_snapshots \
                         (operation_id, identifier, generation, recorded_at) \
                         VALUES (?, ?, ?, ?)",
                    )
                    .bind(operation.as_str())
                    .bind(identifier)
                    .bind(generation)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;
                }
            }
            LedgerOp::ForgetPush { operation } => {
                sqlx::query("DELETE FROM push_snapshots WHERE operation_id = ?")
                    .bind(operation.as_str())
                    .execute(&mut **tx)
                    .await?;
            }
            LedgerOp::Tombstone {
                type_name,
                identifier,
            } => {
                sqlx::query(
                    "INSERT INTO synced_entities \
                     (identifier, type_name, change_state, is_deleted, modified_time) \
                     VALUES (?, ?, 'synced', 1, ?) \
                     ON CONFLICT(identifier) DO UPDATE SET \
                     change_state = 'synced', is_deleted = 1, \
                     modified_time = excluded.modified_time, \
                     generation = synced_entities.generation + 1",
                )
                .bind(&identifier)
                .bind(&type_name)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::PutPending(edge) => {
                let targets = serde_json::to_string(edge.target_identifiers())
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;
                sqlx::query(
                    "INSERT OR REPLACE INTO pending_relationships \
                     (from_type, from_identifier, property_name, to_type, target_identifiers, \
                      attempts, is_considered_dead, is_applied) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&edge.key().from_type)
                .bind(&edge.key().from_identifier)
                .bind(&edge.key().property_name)
                .bind(edge.to_type())
                .bind(&targets)
                .bind(i64::from(edge.attempts()))
                .bind(edge.is_considered_dead())
                .bind(edge.is_applied())
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::UpdatePending(edge) => {
                sqlx::query(
                    "UPDATE pending_relationships \
                     SET attempts = ?, is_considered_dead = ?, is_applied = ? \
                     WHERE from_type = ? AND from_identifier = ? AND property_name = ?",
                )
                .bind(i64::from(edge.attempts()))
                .bind(edge.is_considered_dead())
                .bind(edge.is_applied())
                .bind(&edge.key().from_type)
                .bind(&edge.key().from_identifier)
                .bind(&edge.key().property_name)
                .execute(&mut **tx)
                .await?;
            }
            LedgerOp::InvalidatePendingFrom {
                from_type,
                from_identifier,
            } => {
                sqlx::query(
                    "UPDATE pending_relationships SET is_considered_dead = 1 \
                     WHERE from_type = ? AND from_identifier = ? \
                     AND is_considered_dead = 0 AND is_applied = 0",
                )
                .bind(&from_type)
                .bind(&from_identifier)
                .execute(&mut **tx)
                .await?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse an RFC 3339 datetime string into a DateTime<Utc>
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::SerializationError(format!("Invalid datetime '{}': {}", s, e)))
}

/// Reconstruct a SyncedEntity from a database row
fn entity_from_row(row: &SqliteRow) -> Result<SyncedEntity, CacheError> {
    let identifier: String = row.get("identifier");
    let type_name: String = row.get("type_name");
    let state_str: String = row.get("change_state");
    let is_deleted: bool = row.get("is_deleted");
    let modified_str: Option<String> = row.get("modified_time");
    let generation: i64 = row.get("generation");

    let change_state = ChangeState::from_str(&state_str)
        .map_err(|e| CacheError::SerializationError(format!("{identifier}: {e}")))?;
    let modified_time = modified_str.as_deref().map(parse_datetime).transpose()?;

    Ok(SyncedEntity::from_parts(
        identifier,
        type_name,
        change_state,
        is_deleted,
        modified_time,
        generation,
    ))
}

/// Reconstruct a PendingRelationship from a database row
fn relationship_from_row(row: &SqliteRow) -> Result<PendingRelationship, CacheError> {
    let key = RelationshipKey {
        from_type: row.get("from_type"),
        from_identifier: row.get("from_identifier"),
        property_name: row.get("property_name"),
    };
    let to_type: String = row.get("to_type");
    let targets_json: String = row.get("target_identifiers");
    let attempts: i64 = row.get("attempts");

    let targets: Vec<String> = serde_json::from_str(&targets_json).map_err(|e| {
        CacheError::SerializationError(format!("Invalid target list for {key}: {e}"))
    })?;
    let attempts = u32::try_from(attempts)
        .map_err(|_| CacheError::SerializationError(format!("Invalid attempts for {key}")))?;

    Ok(PendingRelationship::from_parts(
        key,
        to_type,
        targets,
        attempts,
        row.get("is_considered_dead"),
        row.get("is_applied"),
    ))
}

// ============================================================================
// ILedgerRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl ILedgerRepository for SqliteLedgerRepository {
    async fn apply(&self, batch: LedgerBatch) -> Result<(), LedgerError> {
        if batch.is_empty() {
            return Ok(());
        }
        let op_count = batch.len();
        let now = Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        for op in batch.into_ops() {
            // Dropping the transaction on error rolls it back
            Self::apply_op(&mut tx, op, &now)
                .await
                .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        tracing::trace!(ops = op_count, "Applied ledger batch");
        Ok(())
    }

    async fn find(&self, identifier: &str) -> Result<Option<SyncedEntity>, LedgerError> {
        let row = sqlx::query("SELECT * FROM synced_entities WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(CacheError::from)?;

        match row {
            Some(ref r) => Ok(Some(entity_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn find_all(&self, filter: &EntityFilter) -> Result<Vec<SyncedEntity>, LedgerError> {
        let mut sql = String::from("SELECT * FROM synced_entities WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if !filter.states.is_empty() {
            let placeholders = vec!["?"; filter.states.len()].join(", ");
            sql.push_str(&format!(" AND change_state IN ({placeholders})"));
            binds.extend(filter.states.iter().map(|s| s.as_str().to_string()));
        }

        if let Some(ref type_name) = filter.type_name {
            sql.push_str(" AND type_name = ?");
            binds.push(type_name.clone());
        }

        sql.push_str(" ORDER BY identifier");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(entity_from_row(row)?);
        }
        Ok(entities)
    }

    async fn live_relationships(&self) -> Result<Vec<PendingRelationship>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM pending_relationships \
             WHERE is_considered_dead = 0 AND is_applied = 0 \
             ORDER BY from_type, from_identifier, property_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in &rows {
            edges.push(relationship_from_row(row)?);
        }
        Ok(edges)
    }

    async fn relationship(
        &self,
        key: &RelationshipKey,
    ) -> Result<Option<PendingRelationship>, LedgerError> {
        let row = sqlx::query(
            "SELECT * FROM pending_relationships \
             WHERE from_type = ? AND from_identifier = ? AND property_name = ?",
        )
        .bind(&key.from_type)
        .bind(&key.from_identifier)
        .bind(&key.property_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::from)?;

        match row {
            Some(ref r) => Ok(Some(relationship_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn push_snapshot(&self, operation: &OperationId) -> Result<EntityVersions, LedgerError> {
        let rows = sqlx::query(
            "SELECT identifier, generation FROM push_snapshots WHERE operation_id = ?",
        )
        .bind(operation.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;

        Ok(rows
            .iter()
            .map(|row| -> (String, i64) { (row.get("identifier"), row.get("generation")) })
            .collect())
    }

    async fn count_by_state(&self) -> Result<HashMap<ChangeState, u64>, LedgerError> {
        let rows = sqlx::query(
            "SELECT change_state, COUNT(*) as count FROM synced_entities GROUP BY change_state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;

        let mut counts = HashMap::new();
        for row in &rows {
            let state_str: String = row.get("change_state");
            let count: i64 = row.get("count");
            let state = ChangeState::from_str(&state_str)
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
            counts.insert(state, count.max(0) as u64);
        }
        Ok(counts)
    }

    async fn purge_dead_or_applied(&self) -> Result<PurgeReport, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        let entities = sqlx::query(
            "DELETE FROM synced_entities WHERE is_deleted = 1 AND change_state = 'synced'",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        let relationships = sqlx::query(
            "DELETE FROM pending_relationships WHERE is_considered_dead = 1 OR is_applied = 1",
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?;

        let report = PurgeReport {
            entities_removed: entities.rows_affected(),
            relationships_removed: relationships.rows_affected(),
        };
        tracing::debug!(
            entities = report.entities_removed,
            relationships = report.relationships_removed,
            "Ledger cleanup sweep"
        );
        Ok(report)
    }
}
