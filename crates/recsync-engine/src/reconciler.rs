//! Reconciliation engine
//!
//! Owns the entity ledger. Local change batches are recorded as ledger state
//! transitions, the upload set is derived from the ledger, push
//! acknowledgements settle it, and fetched remote changes are written to the
//! local store before deferred relationships are resolved.
//!
//! ## Settling pushes
//!
//! Every local write bumps the entry's generation. An upload set records the
//! generation of each entry it carries and an acknowledgement settles only the
//! entries still at that generation, so edits made while a push is in flight
//! stay pending. Submitted pushes persist their generations under the
//! operation id so a push resumed after restart settles the same way.
//!
//! ## Write scopes
//!
//! Every mutation runs inside a `WriteScope` that holds the engine's write
//! lock. Object writes and ledger operations are staged in the scope and
//! committed together: object writes first (silently, so the engine's own
//! observers never see them), then the ledger batch in one transaction.
//! Helpers take `&mut WriteScope` so that a nested step reuses the enclosing
//! scope instead of waiting on the lock it already holds.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use recsync_core::config::SyncConfig;
use recsync_core::domain::{
    ChangeState, ConfigurationFault, DeletedRecord, FieldKind, LocalObject, ObjectValue,
    OperationId, PendingRelationship, Record, RecordId, RelationshipKey, SchemaRegistry,
    SyncedEntity, ZonePolicy,
};
use recsync_core::ports::{
    ChangeBatch, EntityFilter, EntityVersions, ILedgerRepository, ILocalObjectStore,
    LedgerBatch, LedgerOp, ModifyOutcome, ModifyRequest, ObjectWrite, PurgeReport, WriteMode,
};

use crate::converter::Converter;
use crate::preferences::SyncPreferences;
use crate::SyncError;

// ============================================================================
// Public types
// ============================================================================

/// Per-type callbacks invoked around remote-sourced writes
pub trait LifecycleHooks: Send + Sync {
    /// Called with the local object just before a remote deletion removes it
    fn before_delete(&self, _object: &LocalObject) {}

    /// Called after remote data was merged into the object or one of its
    /// relationships was materialized
    fn after_merge(&self, _object: &LocalObject) {}
}

/// Why a pending relationship could not be materialized
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelationshipError {
    /// The source or a target is not present locally yet; retried later
    #[error("Relationship {key} is partially connected: {missing} is missing")]
    PartiallyConnected { key: RelationshipKey, missing: String },

    /// The edge can never apply; it is dropped
    #[error("Relationship {key} is corrupted: {reason}")]
    DataCorrupted { key: RelationshipKey, reason: String },
}

/// Counts from one relationship resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub applied: usize,
    pub pending: usize,
    pub dead: usize,
}

/// Counts from ingesting one page of remote changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub merged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub relationships: ResolutionReport,
}

/// Records to save and record ids to delete remotely
///
/// `versions` holds the ledger generation of every entry in the set; an
/// acknowledgement only settles entries still at that generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSet {
    pub save: Vec<Record>,
    pub delete: Vec<RecordId>,
    pub versions: EntityVersions,
}

/// One modify request and the generations of the entries it carries
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub request: ModifyRequest,
    pub versions: EntityVersions,
}

impl UploadSet {
    pub fn is_empty(&self) -> bool {
        self.save.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.save.len() + self.delete.len()
    }

    /// Splits the set into batches of at most `batch_size` items
    ///
    /// Saves come before deletes.
    pub fn into_batches(self, batch_size: usize) -> Vec<UploadBatch> {
        let batch_size = batch_size.max(1);
        let versions = self.versions;
        let mut batches = Vec::new();
        let mut current = UploadBatch::default();

        let carry_version = |current: &mut UploadBatch, identifier: &str| {
            if let Some(generation) = versions.get(identifier) {
                current.versions.insert(identifier.to_string(), *generation);
            }
        };

        for record in self.save {
            if current.request.len() == batch_size {
                batches.push(std::mem::take(&mut current));
            }
            carry_version(&mut current, &record.id.name);
            current.request.save.push(record);
        }
        for id in self.delete {
            if current.request.len() == batch_size {
                batches.push(std::mem::take(&mut current));
            }
            carry_version(&mut current, &id.name);
            current.request.delete.push(id);
        }
        if !current.request.is_empty() {
            batches.push(current);
        }
        batches
    }
}

// ============================================================================
// WriteScope
// ============================================================================

/// Staged writes under the engine's write lock
struct WriteScope<'a> {
    _guard: MutexGuard<'a, ()>,
    ledger: LedgerBatch,
    writes: Vec<ObjectWrite>,
    /// Objects as they will be once `writes` are committed; `None` = deleted
    overlay: HashMap<(String, String), Option<LocalObject>>,
}

impl WriteScope<'_> {
    fn put(&mut self, object: LocalObject) {
        self.overlay.insert(
            (object.type_name().to_string(), object.primary_key().to_string()),
            Some(object.clone()),
        );
        self.writes.push(ObjectWrite::Put(object));
    }

    fn delete(&mut self, type_name: &str, primary_key: &str) {
        self.overlay
            .insert((type_name.to_string(), primary_key.to_string()), None);
        self.writes.push(ObjectWrite::Delete {
            type_name: type_name.to_string(),
            primary_key: primary_key.to_string(),
        });
    }

    fn staged(&self, type_name: &str, primary_key: &str) -> Option<&Option<LocalObject>> {
        self.overlay
            .get(&(type_name.to_string(), primary_key.to_string()))
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// The change-tracking and reconciliation engine
pub struct Reconciler {
    registry: Arc<SchemaRegistry>,
    converter: Converter,
    ledger: Arc<dyn ILedgerRepository>,
    store: Arc<dyn ILocalObjectStore>,
    prefs: SyncPreferences,
    hooks: HashMap<String, Arc<dyn LifecycleHooks>>,
    max_attempts: u32,
    write_lock: Mutex<()>,
    upload_ready: Arc<Notify>,
}

impl Reconciler {
    /// Builds the engine for the given tracked types
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] if the zone policy yields an
    /// invalid zone or the local store can hard-delete a tracked type outside
    /// the engine.
    pub fn new(
        registry: SchemaRegistry,
        zone_policy: &ZonePolicy,
        config: &SyncConfig,
        ledger: Arc<dyn ILedgerRepository>,
        store: Arc<dyn ILocalObjectStore>,
        prefs: SyncPreferences,
    ) -> Result<Self, SyncError> {
        for type_name in registry.type_names() {
            if store.capabilities(type_name).hard_delete_outside_engine {
                return Err(ConfigurationFault::HardDeleteCapable(type_name.to_string()).into());
            }
        }

        let zones = zone_policy.resolve(&registry)?;
        let registry = Arc::new(registry);
        let converter = Converter::new(registry.clone(), zones, config.schema_version);

        info!(
            types = registry.len(),
            zones = converter.zones().zones().len(),
            "Reconciler initialized"
        );

        Ok(Self {
            registry,
            converter,
            ledger,
            store,
            prefs,
            hooks: HashMap::new(),
            max_attempts: config.max_relationship_attempts,
            write_lock: Mutex::new(()),
            upload_ready: Arc::new(Notify::new()),
        })
    }

    /// Registers lifecycle hooks for one tracked type
    pub fn with_hooks(mut self, type_name: impl Into<String>, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks.insert(type_name.into(), hooks);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn ledger(&self) -> &Arc<dyn ILedgerRepository> {
        &self.ledger
    }

    /// Signalled whenever local intake leaves work in the upload set
    pub fn upload_ready(&self) -> Arc<Notify> {
        self.upload_ready.clone()
    }

    // ========================================================================
    // Local side
    // ========================================================================

    /// Registers every existing object of `type_name` as `new`
    ///
    /// Runs once per type; later calls return 0 without touching the ledger.
    pub async fn bootstrap_type(&self, type_name: &str) -> Result<usize, SyncError> {
        let Some(descriptor) = self.registry.get(type_name) else {
            warn!(type_name, "Ignoring bootstrap of untracked type");
            return Ok(0);
        };
        if self.prefs.is_bootstrapped(type_name).await? {
            return Ok(0);
        }

        let objects = self
            .store
            .all(type_name)
            .await
            .map_err(SyncError::LocalStore)?;

        let mut scope = self.begin().await;
        let mut registered = 0;
        for object in objects
            .iter()
            .filter(|o| !o.flag(descriptor.soft_delete_field()))
        {
            scope.ledger.push(LedgerOp::InsertIfAbsent {
                type_name: type_name.to_string(),
                identifier: object.primary_key().to_string(),
                state: ChangeState::New,
            });
            registered += 1;
        }
        self.commit(scope).await?;
        self.prefs.set_bootstrapped(type_name).await?;

        info!(type_name, registered, "Bootstrapped ledger");
        Ok(registered)
    }

    /// Records one batch of local change notifications
    ///
    /// Returns true if the upload set for the batch's type is non-empty
    /// afterwards; the upload-ready signal is raised in that case.
    pub async fn intake(&self, batch: ChangeBatch) -> Result<bool, SyncError> {
        let Some(descriptor) = self.registry.get(&batch.type_name) else {
            debug!(type_name = %batch.type_name, "Ignoring changes to untracked type");
            return Ok(false);
        };
        if batch.is_empty() {
            return Ok(false);
        }
        let type_name = descriptor.name();

        let mut scope = self.begin().await;
        for object in batch.inserted.iter().chain(batch.updated.iter()) {
            let identifier = object.primary_key();
            let current = self.ledger.find(identifier).await?;

            if object.flag(descriptor.soft_delete_field()) {
                if current.as_ref().is_some_and(|e| e.is_deleted()) {
                    continue;
                }
                stage_local_deletion(&mut scope, type_name, identifier);
            } else {
                let state = ChangeState::after_local_mutation(current.map(|e| e.change_state()));
                scope.ledger.push(LedgerOp::Upsert {
                    type_name: type_name.to_string(),
                    identifier: identifier.to_string(),
                    state,
                });
                invalidate_edges_from(&mut scope, type_name, identifier);
            }
        }
        for identifier in &batch.deleted {
            let current = self.ledger.find(identifier).await?;
            if current.as_ref().is_some_and(|e| e.is_deleted()) {
                continue;
            }
            stage_local_deletion(&mut scope, type_name, identifier);
        }
        let staged = scope.ledger.len();
        self.commit(scope).await?;

        let pending = self
            .ledger
            .find_all(
                &EntityFilter::new()
                    .with_states([ChangeState::New, ChangeState::Changed, ChangeState::Deleted])
                    .with_type(type_name),
            )
            .await?;

        debug!(type_name, staged, pending = pending.len(), "Recorded local changes");

        let ready = !pending.is_empty();
        if ready {
            self.upload_ready.notify_one();
        }
        Ok(ready)
    }

    /// Subscribes to local change notifications for every tracked type
    ///
    /// Each type gets a task feeding its batches to [`Reconciler::intake`]
    /// until the store closes the channel or `shutdown` fires.
    pub async fn observe(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, SyncError> {
        let mut handles = Vec::with_capacity(self.registry.len());
        for type_name in self.registry.type_names() {
            let mut rx = self
                .store
                .observe(type_name)
                .await
                .map_err(SyncError::LocalStore)?;
            let engine = Arc::clone(self);
            let shutdown = shutdown.clone();
            let type_name = type_name.to_string();

            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        batch = rx.recv() => {
                            let Some(batch) = batch else { break };
                            if let Err(e) = engine.intake(batch).await {
                                error!(type_name = %type_name, error = %e, "Failed to record local changes");
                            }
                        }
                    }
                }
                debug!(type_name = %type_name, "Stopped observing local changes");
            }));
        }
        Ok(handles)
    }

    /// Records to push: every `new`/`changed` object plus every pending deletion
    ///
    /// A `new` entry whose object is gone is dropped; a `changed` one is
    /// turned into a pending deletion and included in this set.
    pub async fn generate_upload_set(&self, type_name: Option<&str>) -> Result<UploadSet, SyncError> {
        let mut filter = EntityFilter::new().with_states([
            ChangeState::New,
            ChangeState::Changed,
            ChangeState::Deleted,
        ]);
        if let Some(type_name) = type_name {
            filter = filter.with_type(type_name);
        }

        let mut upload = UploadSet::default();
        let mut orphans = Vec::new();
        for entity in self.ledger.find_all(&filter).await? {
            match entity.change_state() {
                ChangeState::Deleted => self.stage_remote_deletion(&entity, &mut upload),
                _ => {
                    let object = self
                        .store
                        .get(entity.type_name(), entity.identifier())
                        .await
                        .map_err(SyncError::LocalStore)?;
                    let Some(object) = object else {
                        orphans.push(entity);
                        continue;
                    };
                    match self.converter.to_record(&object) {
                        Ok(record) => {
                            upload
                                .versions
                                .insert(entity.identifier().to_string(), entity.generation());
                            upload.save.push(record);
                        }
                        Err(skip) => warn!(identifier = entity.identifier(), %skip, "Cannot upload object"),
                    }
                }
            }
        }
        if !orphans.is_empty() {
            self.settle_orphans(orphans, &mut upload).await?;
        }
        Ok(upload)
    }

    /// Settles the ledger after the remote store confirmed a push
    ///
    /// Only entries still at the generation recorded in `versions` are
    /// settled: saved records become `synced`, deleted records become
    /// tombstones and their soft-deleted local objects are removed. Entries
    /// changed locally while the push was in flight stay pending.
    pub async fn acknowledge(
        &self,
        outcome: &ModifyOutcome,
        versions: &EntityVersions,
    ) -> Result<(), SyncError> {
        let scope = self.begin().await;
        self.settle(scope, outcome, versions, None).await
    }

    /// Remembers the generations carried by a submitted push
    pub async fn record_push(
        &self,
        operation: &OperationId,
        versions: &EntityVersions,
    ) -> Result<(), SyncError> {
        if versions.is_empty() {
            return Ok(());
        }
        self.ledger
            .apply(LedgerBatch::from(vec![LedgerOp::RecordPush {
                operation: operation.clone(),
                versions: versions.clone(),
            }]))
            .await?;
        Ok(())
    }

    /// Settles a completed push using the generations recorded for it
    ///
    /// A push with no recorded generations settles nothing; its entries
    /// stay pending and are uploaded again.
    pub async fn acknowledge_operation(
        &self,
        operation: &OperationId,
        outcome: &ModifyOutcome,
    ) -> Result<(), SyncError> {
        let scope = self.begin().await;
        let versions = self.ledger.push_snapshot(operation).await?;
        if versions.is_empty() && !(outcome.saved.is_empty() && outcome.deleted.is_empty()) {
            warn!(%operation, "No upload snapshot for operation, its records will be pushed again");
        }
        self.settle(scope, outcome, &versions, Some(operation)).await
    }

    /// Drops the generations recorded for a push that will never complete
    pub async fn forget_push(&self, operation: &OperationId) -> Result<(), SyncError> {
        self.ledger
            .apply(LedgerBatch::from(vec![LedgerOp::ForgetPush {
                operation: operation.clone(),
            }]))
            .await?;
        Ok(())
    }

    async fn settle(
        &self,
        mut scope: WriteScope<'_>,
        outcome: &ModifyOutcome,
        versions: &EntityVersions,
        operation: Option<&OperationId>,
    ) -> Result<(), SyncError> {
        let mut settled = 0;
        let mut superseded = 0;

        for id in &outcome.saved {
            match self.awaiting(&id.name, versions).await? {
                Some((_, generation)) => {
                    scope.ledger.push(LedgerOp::SettleUpload {
                        identifier: id.name.clone(),
                        generation,
                    });
                    settled += 1;
                }
                None => superseded += 1,
            }
        }
        for id in &outcome.deleted {
            match self.awaiting(&id.name, versions).await? {
                Some((entity, generation)) if entity.change_state() == ChangeState::Deleted => {
                    scope.delete(entity.type_name(), entity.identifier());
                    scope.ledger.push(LedgerOp::SettleDeletion {
                        identifier: id.name.clone(),
                        generation,
                    });
                    settled += 1;
                }
                _ => superseded += 1,
            }
        }
        if let Some(operation) = operation {
            scope.ledger.push(LedgerOp::ForgetPush {
                operation: operation.clone(),
            });
        }
        self.commit(scope).await?;

        debug!(settled, superseded, "Acknowledged push");
        Ok(())
    }

    /// The entry for `identifier` if it still holds the uploaded change
    ///
    /// Must be called with the write lock held.
    async fn awaiting(
        &self,
        identifier: &str,
        versions: &EntityVersions,
    ) -> Result<Option<(SyncedEntity, i64)>, SyncError> {
        let Some(&generation) = versions.get(identifier) else {
            return Ok(None);
        };
        let entity = self.ledger.find(identifier).await?;
        Ok(entity
            .filter(|e| e.is_awaiting(generation))
            .map(|e| (e, generation)))
    }

    fn stage_remote_deletion(&self, entity: &SyncedEntity, upload: &mut UploadSet) {
        match self.converter.record_id(entity.type_name(), entity.identifier()) {
            Ok(id) => {
                upload
                    .versions
                    .insert(entity.identifier().to_string(), entity.generation());
                upload.delete.push(id);
            }
            Err(skip) => warn!(identifier = entity.identifier(), %skip, "Cannot delete remotely"),
        }
    }

    /// Resolves `new`/`changed` entries whose local object no longer exists
    async fn settle_orphans(
        &self,
        orphans: Vec<SyncedEntity>,
        upload: &mut UploadSet,
    ) -> Result<(), SyncError> {
        let mut scope = self.begin().await;
        let mut staged = Vec::new();
        for entity in orphans {
            let (type_name, identifier) = (entity.type_name(), entity.identifier());
            let current = self.ledger.find(identifier).await?;
            if !current.is_some_and(|c| c.generation() == entity.generation()) {
                continue;
            }
            let object = self
                .store
                .get(type_name, identifier)
                .await
                .map_err(SyncError::LocalStore)?;
            if object.is_some() {
                continue;
            }

            if entity.change_state() == ChangeState::New {
                warn!(type_name, identifier, "Ledger entry has no local object, dropping it");
                scope.ledger.push(LedgerOp::Tombstone {
                    type_name: type_name.to_string(),
                    identifier: identifier.to_string(),
                });
                invalidate_edges_from(&mut scope, type_name, identifier);
            } else {
                warn!(type_name, identifier, "Ledger entry has no local object, deleting remotely");
                stage_local_deletion(&mut scope, type_name, identifier);
                staged.push(identifier.to_string());
            }
        }
        self.commit(scope).await?;

        for identifier in staged {
            let entity = self.ledger.find(&identifier).await?;
            if let Some(entity) = entity.filter(|e| e.change_state() == ChangeState::Deleted) {
                self.stage_remote_deletion(&entity, upload);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Remote side
    // ========================================================================

    /// Applies one page of fetched remote changes
    ///
    /// Deletions are applied before modifications, so a record deleted and
    /// recreated in the same page ends up existing locally.
    pub async fn ingest(
        &self,
        modified: &[Record],
        deleted: &[DeletedRecord],
    ) -> Result<IngestReport, SyncError> {
        let mut report = IngestReport::default();
        let mut merged = Vec::with_capacity(modified.len());

        let mut scope = self.begin().await;
        for removal in deleted {
            if !self.registry.contains(&removal.record_type) {
                report.skipped += 1;
                continue;
            }
            self.apply_remote_deletion(&mut scope, &removal.record_type, &removal.id.name)
                .await?;
            report.deleted += 1;
        }

        for record in modified {
            let inbound = match self.converter.from_record(record) {
                Ok(inbound) => inbound,
                Err(skip) => {
                    debug!(record = %record.id, %skip, "Skipping fetched record");
                    report.skipped += 1;
                    continue;
                }
            };
            let type_name = inbound.object.type_name().to_string();
            let identifier = inbound.object.primary_key().to_string();

            let object = match self.read(&scope, &type_name, &identifier).await? {
                Some(mut existing) => {
                    existing.merge_scalars(&inbound.object);
                    existing
                }
                None => inbound.object,
            };
            scope.put(object.clone());
            scope.ledger.push(LedgerOp::Upsert {
                type_name,
                identifier,
                state: ChangeState::Synced,
            });
            for edge in inbound.relationships {
                scope.ledger.push(LedgerOp::PutPending(edge));
            }
            merged.push(object);
            report.merged += 1;
        }
        self.commit(scope).await?;

        for object in &merged {
            self.run_after_merge(object);
        }

        report.relationships = self.resolve_relationships().await?;
        Ok(report)
    }

    async fn apply_remote_deletion(
        &self,
        scope: &mut WriteScope<'_>,
        type_name: &str,
        identifier: &str,
    ) -> Result<(), SyncError> {
        if let Some(object) = self.read(scope, type_name, identifier).await? {
            if let Some(hooks) = self.hooks.get(type_name) {
                hooks.before_delete(&object);
            }
            scope.delete(type_name, identifier);
        }
        scope.ledger.push(LedgerOp::Tombstone {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
        });
        invalidate_edges_from(scope, type_name, identifier);
        Ok(())
    }

    /// Attempts to materialize every live pending relationship
    pub async fn resolve_relationships(&self) -> Result<ResolutionReport, SyncError> {
        let edges = self.ledger.live_relationships().await?;
        let mut report = ResolutionReport::default();
        if edges.is_empty() {
            return Ok(report);
        }

        let mut touched = Vec::new();
        let mut scope = self.begin().await;
        for mut edge in edges {
            match self.attempt_edge(&mut scope, &edge).await? {
                Ok(objects) => {
                    edge.mark_applied();
                    touched.extend(objects);
                    report.applied += 1;
                }
                Err(RelationshipError::PartiallyConnected { key, missing }) => {
                    edge.record_miss(self.max_attempts);
                    if edge.is_considered_dead() {
                        warn!(relationship = %key, missing = %missing, attempts = edge.attempts(), "Giving up on relationship");
                        report.dead += 1;
                    } else {
                        debug!(relationship = %key, missing = %missing, attempts = edge.attempts(), "Relationship still pending");
                        report.pending += 1;
                    }
                }
                Err(corrupted @ RelationshipError::DataCorrupted { .. }) => {
                    warn!(error = %corrupted, "Dropping relationship");
                    edge.mark_dead();
                    report.dead += 1;
                }
            }
            scope.ledger.push(LedgerOp::UpdatePending(edge));
        }
        self.commit(scope).await?;

        for object in &touched {
            self.run_after_merge(object);
        }

        info!(
            applied = report.applied,
            pending = report.pending,
            dead = report.dead,
            "Resolved relationships"
        );
        Ok(report)
    }

    async fn attempt_edge(
        &self,
        scope: &mut WriteScope<'_>,
        edge: &PendingRelationship,
    ) -> Result<Result<Vec<LocalObject>, RelationshipError>, SyncError> {
        let key = edge.key();
        let corrupted = |reason: &str| RelationshipError::DataCorrupted {
            key: key.clone(),
            reason: reason.to_string(),
        };

        let Some(descriptor) = self.registry.get(&key.from_type) else {
            return Ok(Err(corrupted("source type is not tracked")));
        };
        let Some(field) = descriptor
            .field_named(&key.property_name)
            .filter(|f| !f.excluded)
        else {
            return Ok(Err(corrupted("no such property")));
        };
        let Some(target_type) = field.kind.relationship_target() else {
            return Ok(Err(corrupted("property is not a relationship")));
        };
        if target_type != edge.to_type() {
            return Ok(Err(corrupted("target type does not match the property")));
        }

        let Some(mut source) = self.read(scope, &key.from_type, &key.from_identifier).await? else {
            return Ok(Err(RelationshipError::PartiallyConnected {
                key: key.clone(),
                missing: format!("{}({})", key.from_type, key.from_identifier),
            }));
        };

        let mut targets = Vec::with_capacity(edge.target_identifiers().len());
        for identifier in edge.target_identifiers() {
            match self.read(scope, target_type, identifier).await? {
                Some(target) => targets.push(target),
                None => {
                    return Ok(Err(RelationshipError::PartiallyConnected {
                        key: key.clone(),
                        missing: format!("{target_type}({identifier})"),
                    }))
                }
            }
        }

        let value = match field.kind {
            FieldKind::List { .. } => {
                ObjectValue::LinkList(targets.iter().map(LocalObject::object_ref).collect())
            }
            _ => ObjectValue::Link(targets.first().map(LocalObject::object_ref)),
        };
        source.set(key.property_name.clone(), value);
        scope.put(source.clone());

        let mut touched = vec![source];
        touched.extend(targets);
        Ok(Ok(touched))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Removes tombstones and settled relationship edges
    pub async fn cleanup_sweep(&self) -> Result<PurgeReport, SyncError> {
        let _guard = self.write_lock.lock().await;
        let report = self.ledger.purge_dead_or_applied().await?;
        info!(
            entities = report.entities_removed,
            relationships = report.relationships_removed,
            "Cleanup sweep finished"
        );
        Ok(report)
    }

    /// Ledger entry counts per state
    pub async fn state_counts(&self) -> Result<HashMap<ChangeState, u64>, SyncError> {
        Ok(self.ledger.count_by_state().await?)
    }

    // ========================================================================
    // Scope plumbing
    // ========================================================================

    async fn begin(&self) -> WriteScope<'_> {
        WriteScope {
            _guard: self.write_lock.lock().await,
            ledger: LedgerBatch::new(),
            writes: Vec::new(),
            overlay: HashMap::new(),
        }
    }

    async fn commit(&self, scope: WriteScope<'_>) -> Result<(), SyncError> {
        let WriteScope {
            _guard,
            ledger,
            writes,
            ..
        } = scope;

        if !writes.is_empty() {
            self.store
                .commit(writes, WriteMode::Silent)
                .await
                .map_err(SyncError::LocalStore)?;
        }
        if !ledger.is_empty() {
            self.ledger.apply(ledger).await?;
        }
        Ok(())
    }

    async fn read(
        &self,
        scope: &WriteScope<'_>,
        type_name: &str,
        primary_key: &str,
    ) -> Result<Option<LocalObject>, SyncError> {
        if let Some(staged) = scope.staged(type_name, primary_key) {
            return Ok(staged.clone());
        }
        self.store
            .get(type_name, primary_key)
            .await
            .map_err(SyncError::LocalStore)
    }

    fn run_after_merge(&self, object: &LocalObject) {
        if let Some(hooks) = self.hooks.get(object.type_name()) {
            hooks.after_merge(object);
        }
    }
}

fn stage_local_deletion(scope: &mut WriteScope<'_>, type_name: &str, identifier: &str) {
    scope.ledger.push(LedgerOp::Upsert {
        type_name: type_name.to_string(),
        identifier: identifier.to_string(),
        state: ChangeState::Deleted,
    });
    invalidate_edges_from(scope, type_name, identifier);
}

/// A changed or deleted source must not have a stale edge applied later
fn invalidate_edges_from(scope: &mut WriteScope<'_>, type_name: &str, identifier: &str) {
    scope.ledger.push(LedgerOp::InvalidatePendingFrom {
        from_type: type_name.to_string(),
        from_identifier: identifier.to_string(),
    });
}
