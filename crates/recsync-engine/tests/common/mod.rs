//! Shared test doubles for the engine integration tests
//!
//! - [`MemoryObjectStore`]: in-memory local object store with observers
//! - [`MockRemote`]: scripted remote record store
//! - [`RecordingNotifier`]: collects host notifications
//! - [`Harness`]: a reconciler wired to an in-memory SQLite ledger

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use recsync_cache::{DatabasePool, SqliteLedgerRepository, SqlitePreferenceStore};
use recsync_core::config::SyncConfig;
use recsync_core::domain::{
    ChangeToken, FieldDescriptor, LocalObject, ObjectValue, OperationId, RecordId,
    SchemaRegistry, SubscriptionId, TypeDescriptor, ZoneId, ZonePolicy,
};
use recsync_core::ports::{
    AccountStatus, ChangeBatch, DatabaseChanges, ILocalObjectStore, INotificationService,
    IRemoteRecordStore, ModifyOutcome, ModifyRequest, ObjectWrite, RemoteError,
    StoreCapabilities, SyncNotification, WriteMode, ZoneChanges,
};
use recsync_engine::{Reconciler, SyncPreferences};

// ============================================================================
// Schema
// ============================================================================

pub fn registry() -> SchemaRegistry {
    let pilot = TypeDescriptor::new("Pilot")
        .field(FieldDescriptor::string("id").primary_key())
        .field(FieldDescriptor::string("name"))
        .field(FieldDescriptor::int("rank"))
        .field(FieldDescriptor::string("note").excluded())
        .field(FieldDescriptor::bool("isDeleted"));
    let suit = TypeDescriptor::new("Suit")
        .field(FieldDescriptor::string("id").primary_key())
        .field(FieldDescriptor::string("model"))
        .field(FieldDescriptor::relationship("pilot", "Pilot"))
        .field(FieldDescriptor::list("crew", "Pilot"))
        .field(FieldDescriptor::bool("isDeleted"));
    SchemaRegistry::new(vec![pilot, suit]).expect("valid test schema")
}

pub fn pilot(id: &str, name: &str) -> LocalObject {
    LocalObject::new("Pilot", id)
        .with("name", ObjectValue::String(name.to_string()))
        .with("rank", ObjectValue::Int(1))
        .with("isDeleted", ObjectValue::Bool(false))
}

pub fn suit(id: &str, model: &str) -> LocalObject {
    LocalObject::new("Suit", id)
        .with("model", ObjectValue::String(model.to_string()))
        .with("isDeleted", ObjectValue::Bool(false))
}

pub fn token(value: &str) -> ChangeToken {
    ChangeToken::new(value.as_bytes().to_vec()).expect("non-empty token")
}

pub fn default_id(name: &str) -> RecordId {
    RecordId::new(ZoneId::default_zone(), name)
}

// ============================================================================
// MemoryObjectStore
// ============================================================================

/// Local object store kept in memory
///
/// `Notify` commits are reported to observers; `Silent` commits are not,
/// and are counted so tests can check the engine never triggers itself.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), LocalObject>>,
    observers: Mutex<HashMap<String, Vec<mpsc::Sender<ChangeBatch>>>>,
    hard_delete: HashSet<String>,
    silent_commits: Mutex<usize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that allows hard deletes of `type_name` outside the engine
    pub fn with_hard_delete(type_name: &str) -> Self {
        Self {
            hard_delete: HashSet::from([type_name.to_string()]),
            ..Self::default()
        }
    }

    /// Stores an object without any notification
    pub fn seed(&self, object: LocalObject) {
        self.objects.lock().unwrap().insert(
            (object.type_name().to_string(), object.primary_key().to_string()),
            object,
        );
    }

    /// A local write made by the application; returns the change batch
    pub fn local_put(&self, object: LocalObject) -> ChangeBatch {
        let batch = self.apply(vec![ObjectWrite::Put(object)]);
        self.notify(&batch);
        batch
    }

    /// A local soft delete made by the application
    pub fn local_soft_delete(&self, type_name: &str, primary_key: &str) -> ChangeBatch {
        let object = self
            .object(type_name, primary_key)
            .expect("object to soft-delete")
            .with("isDeleted", ObjectValue::Bool(true));
        self.local_put(object)
    }

    /// Removes an object without telling anyone, as a store losing data would
    pub fn forget(&self, type_name: &str, primary_key: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(type_name.to_string(), primary_key.to_string()));
    }

    pub fn object(&self, type_name: &str, primary_key: &str) -> Option<LocalObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(type_name.to_string(), primary_key.to_string()))
            .cloned()
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == type_name)
            .count()
    }

    pub fn silent_commits(&self) -> usize {
        *self.silent_commits.lock().unwrap()
    }

    fn apply(&self, writes: Vec<ObjectWrite>) -> ChangeBatch {
        let mut objects = self.objects.lock().unwrap();
        let mut batch = ChangeBatch::default();
        for write in writes {
            match write {
                ObjectWrite::Put(object) => {
                    batch.type_name = object.type_name().to_string();
                    let key = (object.type_name().to_string(), object.primary_key().to_string());
                    if objects.insert(key, object.clone()).is_some() {
                        batch.updated.push(object);
                    } else {
                        batch.inserted.push(object);
                    }
                }
                ObjectWrite::Delete {
                    type_name,
                    primary_key,
                } => {
                    if objects
                        .remove(&(type_name.clone(), primary_key.clone()))
                        .is_some()
                    {
                        batch.deleted.push(primary_key);
                    }
                    batch.type_name = type_name;
                }
            }
        }
        batch
    }

    fn notify(&self, batch: &ChangeBatch) {
        if let Some(senders) = self.observers.lock().unwrap().get(&batch.type_name) {
            for sender in senders {
                let _ = sender.try_send(batch.clone());
            }
        }
    }
}

#[async_trait::async_trait]
impl ILocalObjectStore for MemoryObjectStore {
    async fn get(&self, type_name: &str, primary_key: &str) -> anyhow::Result<Option<LocalObject>> {
        Ok(self.object(type_name, primary_key))
    }

    async fn all(&self, type_name: &str) -> anyhow::Result<Vec<LocalObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.type_name() == type_name)
            .cloned()
            .collect())
    }

    async fn commit(&self, writes: Vec<ObjectWrite>, mode: WriteMode) -> anyhow::Result<()> {
        let batch = self.apply(writes);
        match mode {
            WriteMode::Notify => self.notify(&batch),
            WriteMode::Silent => *self.silent_commits.lock().unwrap() += 1,
        }
        Ok(())
    }

    async fn observe(&self, type_name: &str) -> anyhow::Result<mpsc::Receiver<ChangeBatch>> {
        let (tx, rx) = mpsc::channel(64);
        self.observers
            .lock()
            .unwrap()
            .entry(type_name.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn capabilities(&self, type_name: &str) -> StoreCapabilities {
        StoreCapabilities {
            hard_delete_outside_engine: self.hard_delete.contains(type_name),
        }
    }
}

// ============================================================================
// MockRemote
// ============================================================================

/// Scripted state of the mock remote store
pub struct RemoteState {
    pub account: AccountStatus,
    pub existing_zones: BTreeSet<ZoneId>,
    pub created_zones: Vec<ZoneId>,
    pub database_pages: VecDeque<DatabaseChanges>,
    pub zone_pages: HashMap<ZoneId, VecDeque<ZoneChanges>>,
    /// Every zone fetch as (zone, token sent)
    pub zone_fetches: Vec<(ZoneId, Option<ChangeToken>)>,
    pub database_fetches: Vec<Option<ChangeToken>>,
    /// Errors returned, in order, by the named method before it succeeds
    pub errors: HashMap<&'static str, VecDeque<RemoteError>>,
    pub submitted: Vec<ModifyRequest>,
    pub operations: HashMap<OperationId, ModifyOutcome>,
    pub pending: Vec<OperationId>,
    pub subscriptions: BTreeSet<String>,
    pub calls: Vec<&'static str>,
    next_operation: u32,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            account: AccountStatus::Available,
            existing_zones: BTreeSet::new(),
            created_zones: Vec::new(),
            database_pages: VecDeque::new(),
            zone_pages: HashMap::new(),
            zone_fetches: Vec::new(),
            database_fetches: Vec::new(),
            errors: HashMap::new(),
            submitted: Vec::new(),
            operations: HashMap::new(),
            pending: Vec::new(),
            subscriptions: BTreeSet::new(),
            calls: Vec::new(),
            next_operation: 0,
        }
    }
}

#[derive(Default)]
pub struct MockRemote {
    pub state: Mutex<RemoteState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, method: &'static str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .errors
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub fn queue_zone_page(&self, zone: ZoneId, page: ZoneChanges) {
        self.state
            .lock()
            .unwrap()
            .zone_pages
            .entry(zone)
            .or_default()
            .push_back(page);
    }

    pub fn queue_database_page(&self, page: DatabaseChanges) {
        self.state.lock().unwrap().database_pages.push_back(page);
    }

    /// A long-running push left over from a previous process
    pub fn leave_pending(&self, id: &str, outcome: ModifyOutcome) {
        let id = OperationId::new(id.to_string()).expect("valid operation id");
        let mut state = self.state.lock().unwrap();
        state.operations.insert(id.clone(), outcome);
        state.pending.push(id);
    }

    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, RemoteState>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method);
        if let Some(error) = state.errors.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl IRemoteRecordStore for MockRemote {
    async fn account_status(&self) -> Result<AccountStatus, RemoteError> {
        Ok(self.enter("account_status")?.account)
    }

    async fn zone_exists(&self, zone: &ZoneId) -> Result<bool, RemoteError> {
        Ok(self.enter("zone_exists")?.existing_zones.contains(zone))
    }

    async fn create_zone(&self, zone: &ZoneId) -> Result<(), RemoteError> {
        let mut state = self.enter("create_zone")?;
        state.existing_zones.insert(zone.clone());
        state.created_zones.push(zone.clone());
        Ok(())
    }

    async fn fetch_database_changes(
        &self,
        since: Option<&ChangeToken>,
    ) -> Result<DatabaseChanges, RemoteError> {
        let mut state = self.enter("fetch_database_changes")?;
        state.database_fetches.push(since.cloned());
        Ok(state.database_pages.pop_front().unwrap_or_else(|| DatabaseChanges {
            changed_zones: vec![],
            deleted_zones: vec![],
            token: since.cloned().unwrap_or_else(|| token("db-0")),
            more_coming: false,
        }))
    }

    async fn fetch_zone_changes(
        &self,
        zone: &ZoneId,
        since: Option<&ChangeToken>,
    ) -> Result<ZoneChanges, RemoteError> {
        let mut state = self.enter("fetch_zone_changes")?;
        state.zone_fetches.push((zone.clone(), since.cloned()));
        let page = state.zone_pages.get_mut(zone).and_then(VecDeque::pop_front);
        Ok(page.unwrap_or_else(|| ZoneChanges {
            modified: vec![],
            deleted: vec![],
            token: since.cloned().unwrap_or_else(|| token("zone-0")),
            more_coming: false,
        }))
    }

    async fn submit_modify(&self, request: ModifyRequest) -> Result<OperationId, RemoteError> {
        let mut state = self.enter("submit_modify")?;
        state.next_operation += 1;
        let id = OperationId::new(format!("op-{}", state.next_operation)).expect("valid id");
        let outcome = ModifyOutcome {
            saved: request.save.iter().map(|r| r.id.clone()).collect(),
            deleted: request.delete.clone(),
        };
        state.operations.insert(id.clone(), outcome);
        state.submitted.push(request);
        Ok(id)
    }

    async fn await_operation(&self, id: &OperationId) -> Result<ModifyOutcome, RemoteError> {
        let mut state = self.enter("await_operation")?;
        state.pending.retain(|p| p != id);
        state
            .operations
            .remove(id)
            .ok_or_else(|| RemoteError::OperationNotFound(id.clone()))
    }

    async fn pending_operations(&self) -> Result<Vec<OperationId>, RemoteError> {
        Ok(self.enter("pending_operations")?.pending.clone())
    }

    async fn save_subscription(&self, id: &SubscriptionId) -> Result<(), RemoteError> {
        self.enter("save_subscription")?
            .subscriptions
            .insert(id.to_string());
        Ok(())
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), RemoteError> {
        self.enter("delete_subscription")?
            .subscriptions
            .remove(id.as_str());
        Ok(())
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SyncNotification>>,
}

#[async_trait::async_trait]
impl INotificationService for RecordingNotifier {
    async fn notify(&self, notification: &SyncNotification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A reconciler over an in-memory ledger and object store
pub struct Harness {
    pub pool: DatabasePool,
    pub ledger: Arc<SqliteLedgerRepository>,
    pub prefs: SyncPreferences,
    pub store: Arc<MemoryObjectStore>,
    pub engine: Arc<Reconciler>,
}

pub async fn harness() -> Harness {
    harness_with(ZonePolicy::Default, SyncConfig::default()).await
}

pub async fn harness_with(policy: ZonePolicy, config: SyncConfig) -> Harness {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let ledger = Arc::new(SqliteLedgerRepository::new(pool.pool().clone()));
    let prefs = SyncPreferences::new(Arc::new(SqlitePreferenceStore::new(pool.pool().clone())));
    let store = Arc::new(MemoryObjectStore::new());
    let engine = Reconciler::new(
        registry(),
        &policy,
        &config,
        ledger.clone(),
        store.clone(),
        prefs.clone(),
    )
    .expect("valid engine configuration");

    Harness {
        pool,
        ledger,
        prefs,
        store,
        engine: Arc::new(engine),
    }
}
