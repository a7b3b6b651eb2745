//! Sync driver
//!
//! Runs the pull/push protocol against the remote record store. Every
//! public operation is a chain of suspension points:
//!
//! ```text
//! account check ──→ zone provisioning ──→ fetch / push ──→ local apply
//! ```
//!
//! Pull and push are serialized: one never starts while the other is in
//! flight. Transient remote failures are retried after the server's delay
//! hint; any other failure aborts the chain and leaves the ledger untouched
//! for that step, so the whole operation is safe to run again. Account and
//! availability failures are also reported to the host through the
//! notification port.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use recsync_core::config::SyncConfig;
use recsync_core::domain::{SubscriptionId, ZoneId};
use recsync_core::ports::{INotificationService, IRemoteRecordStore, RemoteError, SyncNotification};

use crate::preferences::SyncPreferences;
use crate::reconciler::{IngestReport, Reconciler, UploadBatch};
use crate::retry::with_retry;
use crate::SyncError;

// ============================================================================
// Summaries
// ============================================================================

/// Outcome of one pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub pass_id: Uuid,
    pub zones_fetched: usize,
    pub records_merged: usize,
    pub records_deleted: usize,
    pub records_skipped: usize,
    pub relationships_applied: usize,
    pub relationships_pending: usize,
    pub relationships_dead: usize,
}

impl PullSummary {
    fn new() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            zones_fetched: 0,
            records_merged: 0,
            records_deleted: 0,
            records_skipped: 0,
            relationships_applied: 0,
            relationships_pending: 0,
            relationships_dead: 0,
        }
    }

    fn absorb(&mut self, report: &IngestReport) {
        self.records_merged += report.merged;
        self.records_deleted += report.deleted;
        self.records_skipped += report.skipped;
        self.relationships_applied += report.relationships.applied;
        // Each pass retries the edges earlier passes left pending.
        self.relationships_pending = report.relationships.pending;
        self.relationships_dead += report.relationships.dead;
    }
}

/// Outcome of one push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSummary {
    pub pass_id: Uuid,
    pub batches: usize,
    pub saved: usize,
    pub deleted: usize,
}

impl PushSummary {
    fn new() -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            batches: 0,
            saved: 0,
            deleted: 0,
        }
    }
}

/// Outcome of [`SyncDriver::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSummary {
    pub zones_created: usize,
    pub operations_resumed: usize,
    pub objects_bootstrapped: usize,
    pub pull: PullSummary,
    pub push: PushSummary,
}

// ============================================================================
// SyncDriver
// ============================================================================

/// Drives synchronization between the reconciler and the remote store
pub struct SyncDriver {
    remote: Arc<dyn IRemoteRecordStore>,
    reconciler: Arc<Reconciler>,
    prefs: SyncPreferences,
    notifier: Arc<dyn INotificationService>,
    config: SyncConfig,
    subscription: SubscriptionId,
    op_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl SyncDriver {
    /// Creates a driver
    ///
    /// # Errors
    /// Returns [`SyncError::Domain`] if the configured subscription id is blank.
    pub fn new(
        remote: Arc<dyn IRemoteRecordStore>,
        reconciler: Arc<Reconciler>,
        prefs: SyncPreferences,
        notifier: Arc<dyn INotificationService>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let subscription = SubscriptionId::new(config.subscription_id.clone())?;
        Ok(Self {
            remote,
            reconciler,
            prefs,
            notifier,
            config,
            subscription,
            op_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops [`SyncDriver::run`] and aborts pending retries
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Switches sync on
    ///
    /// Checks the account, provisions zones, registers the change
    /// subscription, re-attaches pushes left in flight by a previous run,
    /// bootstraps the ledger, then pulls and pushes.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<StartSummary, SyncError> {
        let _op = self.op_lock.lock().await;
        let result = self.start_chain().await;
        self.surface(result).await
    }

    /// Fetches and applies remote changes
    #[tracing::instrument(skip(self))]
    pub async fn pull(&self) -> Result<PullSummary, SyncError> {
        let _op = self.op_lock.lock().await;
        let result = async {
            self.check_account().await?;
            self.provision_zones().await?;
            self.fetch_changes().await
        }
        .await;
        self.surface(result).await
    }

    /// Uploads the current upload set
    #[tracing::instrument(skip(self))]
    pub async fn push(&self) -> Result<PushSummary, SyncError> {
        let _op = self.op_lock.lock().await;
        let result = async {
            self.check_account().await?;
            self.provision_zones().await?;
            self.upload_changes().await
        }
        .await;
        self.surface(result).await
    }

    /// Pull followed by push under one lock
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> Result<(PullSummary, PushSummary), SyncError> {
        let _op = self.op_lock.lock().await;
        let result = async {
            self.check_account().await?;
            self.provision_zones().await?;
            let pull = self.fetch_changes().await?;
            let push = self.upload_changes().await?;
            Ok::<_, SyncError>((pull, push))
        }
        .await;
        self.surface(result).await
    }

    /// Entry point for a push notification from the remote store
    pub async fn handle_remote_notification(&self) -> Result<PullSummary, SyncError> {
        debug!("Remote change notification received");
        self.pull().await
    }

    /// Switches sync off: drops the subscription and forgets all tokens and flags
    #[tracing::instrument(skip(self))]
    pub async fn switch_off(&self) -> Result<(), SyncError> {
        let _op = self.op_lock.lock().await;

        if let Err(e) = with_retry("delete_subscription", &self.shutdown, || {
            self.remote.delete_subscription(&self.subscription)
        })
        .await
        {
            warn!(error = %e, "Failed to delete change subscription");
        }

        self.prefs.clear_all().await?;
        info!("Sync switched off");
        Ok(())
    }

    /// Runs the ledger cleanup sweep
    pub async fn cleanup(&self) -> Result<(), SyncError> {
        let _op = self.op_lock.lock().await;
        self.reconciler.cleanup_sweep().await?;
        Ok(())
    }

    /// Pushes when local changes are ready and syncs on every poll tick
    ///
    /// Returns once the shutdown token is cancelled. Failures are logged and
    /// the loop keeps going.
    pub async fn run(&self) {
        info!(poll_secs = self.config.poll_interval, "Sync driver loop starting");

        let upload_ready = self.reconciler.upload_ready();
        let period = Duration::from_secs(self.config.poll_interval);
        let mut poll_timer = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = upload_ready.notified() => {
                    match self.push().await {
                        Ok(summary) if summary.batches > 0 => {
                            debug!(pass_id = %summary.pass_id, saved = summary.saved, "Pushed local changes");
                        }
                        Ok(_) => {}
                        Err(e) => log_failure("push", &e),
                    }
                }
                _ = poll_timer.tick() => {
                    if let Err(e) = self.sync().await {
                        log_failure("sync", &e);
                    }
                }
            }
        }

        info!("Sync driver loop stopped");
    }

    // ========================================================================
    // Chain steps
    // ========================================================================

    async fn start_chain(&self) -> Result<StartSummary, SyncError> {
        self.check_account().await?;
        let zones_created = self.provision_zones().await?;
        self.ensure_subscription().await?;
        let operations_resumed = self.resume_operations().await?;

        let mut objects_bootstrapped = 0;
        let types: Vec<String> = self
            .reconciler
            .registry()
            .type_names()
            .map(str::to_string)
            .collect();
        for type_name in &types {
            objects_bootstrapped += self.reconciler.bootstrap_type(type_name).await?;
        }

        let pull = self.fetch_changes().await?;
        let push = self.upload_changes().await?;

        info!(
            zones_created,
            operations_resumed, objects_bootstrapped, "Sync switched on"
        );
        Ok(StartSummary {
            zones_created,
            operations_resumed,
            objects_bootstrapped,
            pull,
            push,
        })
    }

    async fn check_account(&self) -> Result<(), SyncError> {
        let status = with_retry("account_status", &self.shutdown, || {
            self.remote.account_status()
        })
        .await?;

        if !status.is_available() {
            warn!(%status, "Remote account is not usable");
            return Err(RemoteError::AccountInvalid(status).into());
        }
        Ok(())
    }

    /// Creates every non-default zone not yet known to exist
    async fn provision_zones(&self) -> Result<usize, SyncError> {
        let mut created = 0;
        for zone in self.reconciler.converter().zones().zones() {
            if zone.is_default() || self.prefs.is_zone_provisioned(&zone).await? {
                continue;
            }

            let exists = with_retry("zone_exists", &self.shutdown, || {
                self.remote.zone_exists(&zone)
            })
            .await?;
            if !exists {
                with_retry("create_zone", &self.shutdown, || self.remote.create_zone(&zone))
                    .await?;
                info!(%zone, "Created zone");
                created += 1;
            }
            self.prefs.set_zone_provisioned(&zone, true).await?;
        }
        Ok(created)
    }

    async fn ensure_subscription(&self) -> Result<(), SyncError> {
        if self.prefs.is_subscription_active().await? {
            return Ok(());
        }
        with_retry("save_subscription", &self.shutdown, || {
            self.remote.save_subscription(&self.subscription)
        })
        .await?;
        self.prefs.set_subscription_active(true).await?;
        info!(subscription = %self.subscription, "Registered change subscription");
        Ok(())
    }

    /// Re-attaches pushes that were still running when the process stopped
    async fn resume_operations(&self) -> Result<usize, SyncError> {
        let pending = with_retry("pending_operations", &self.shutdown, || {
            self.remote.pending_operations()
        })
        .await?;

        let mut resumed = 0;
        for operation in &pending {
            let outcome = with_retry("await_operation", &self.shutdown, || {
                self.remote.await_operation(operation)
            })
            .await;
            match outcome {
                Ok(outcome) => {
                    self.reconciler
                        .acknowledge_operation(operation, &outcome)
                        .await?;
                    resumed += 1;
                }
                Err(SyncError::Remote(RemoteError::OperationNotFound(_))) => {
                    warn!(%operation, "Pending operation no longer known remotely");
                    self.reconciler.forget_push(operation).await?;
                }
                Err(e) => return Err(e),
            }
        }
        if resumed > 0 {
            info!(resumed, "Resumed interrupted pushes");
        }
        Ok(resumed)
    }

    async fn fetch_changes(&self) -> Result<PullSummary, SyncError> {
        let mut summary = PullSummary::new();
        let ours = self.reconciler.converter().zones().zones();

        let mut to_fetch: BTreeSet<ZoneId> =
            ours.iter().filter(|z| z.is_default()).cloned().collect();
        let mut token = self.prefs.database_token().await?;
        let mut refetched = false;

        loop {
            let fetched = with_retry("fetch_database_changes", &self.shutdown, || {
                self.remote.fetch_database_changes(token.as_ref())
            })
            .await;
            let changes = match fetched {
                Ok(changes) => changes,
                Err(SyncError::Remote(RemoteError::ChangeTokenExpired)) if !refetched => {
                    warn!("Database change token expired, fetching from scratch");
                    token = None;
                    refetched = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for zone in changes.deleted_zones.iter().filter(|z| ours.contains(*z)) {
                warn!(%zone, "Zone was deleted remotely");
                self.forget_zone(zone).await?;
                to_fetch.remove(zone);
            }
            to_fetch.extend(changes.changed_zones.into_iter().filter(|z| ours.contains(z)));

            token = Some(changes.token);
            if !changes.more_coming {
                break;
            }
        }

        for zone in &to_fetch {
            self.pull_zone(zone, &mut summary).await?;
        }
        if let Some(token) = &token {
            self.prefs.set_database_token(token).await?;
        }

        info!(
            pass_id = %summary.pass_id,
            zones = summary.zones_fetched,
            merged = summary.records_merged,
            deleted = summary.records_deleted,
            skipped = summary.records_skipped,
            relationships_pending = summary.relationships_pending,
            "Pull finished"
        );
        Ok(summary)
    }

    /// Fetches one zone page by page, persisting the token after each page
    async fn pull_zone(&self, zone: &ZoneId, summary: &mut PullSummary) -> Result<(), SyncError> {
        let mut token = self.prefs.zone_token(zone).await?;
        let mut refetched = false;

        loop {
            let fetched = with_retry("fetch_zone_changes", &self.shutdown, || {
                self.remote.fetch_zone_changes(zone, token.as_ref())
            })
            .await;
            let page = match fetched {
                Ok(page) => page,
                Err(SyncError::Remote(RemoteError::ChangeTokenExpired)) if !refetched => {
                    warn!(%zone, "Zone change token expired, fetching from scratch");
                    self.prefs.clear_zone_token(zone).await?;
                    token = None;
                    refetched = true;
                    continue;
                }
                Err(e) => return Err(self.on_zone_failure(e).await),
            };

            let report = self.reconciler.ingest(&page.modified, &page.deleted).await?;
            summary.absorb(&report);
            self.prefs.set_zone_token(zone, &page.token).await?;
            debug!(
                %zone,
                merged = report.merged,
                deleted = report.deleted,
                more_coming = page.more_coming,
                "Applied zone page"
            );

            token = Some(page.token);
            if !page.more_coming {
                break;
            }
        }

        summary.zones_fetched += 1;
        Ok(())
    }

    async fn upload_changes(&self) -> Result<PushSummary, SyncError> {
        let mut summary = PushSummary::new();
        let upload = self.reconciler.generate_upload_set(None).await?;
        if upload.is_empty() {
            debug!("Nothing to push");
            return Ok(summary);
        }

        for UploadBatch { request, versions } in upload.into_batches(self.config.push_batch_size) {
            let operation = match with_retry("submit_modify", &self.shutdown, || {
                self.remote.submit_modify(request.clone())
            })
            .await
            {
                Ok(operation) => operation,
                Err(e) => return Err(self.on_zone_failure(e).await),
            };
            self.reconciler.record_push(&operation, &versions).await?;

            let outcome = match with_retry("await_operation", &self.shutdown, || {
                self.remote.await_operation(&operation)
            })
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.on_zone_failure(e).await),
            };

            self.reconciler
                .acknowledge_operation(&operation, &outcome)
                .await?;
            summary.batches += 1;
            summary.saved += outcome.saved.len();
            summary.deleted += outcome.deleted.len();
        }

        info!(
            pass_id = %summary.pass_id,
            batches = summary.batches,
            saved = summary.saved,
            deleted = summary.deleted,
            "Push finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // Failure handling
    // ========================================================================

    /// A missing zone is re-provisioned by the next chain
    async fn on_zone_failure(&self, err: SyncError) -> SyncError {
        if let Some(RemoteError::ZoneNotFound(zone)) = err.remote() {
            warn!(%zone, "Zone missing remotely, will re-provision");
            if let Err(e) = self.forget_zone(zone).await {
                error!(%zone, error = %e, "Failed to reset zone state");
            }
        }
        err
    }

    async fn forget_zone(&self, zone: &ZoneId) -> Result<(), SyncError> {
        self.prefs.clear_zone_token(zone).await?;
        self.prefs.set_zone_provisioned(zone, false).await
    }

    /// Tells the host about failures it has to act on
    async fn surface<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(err) = &result {
            let notification = match err.remote() {
                Some(RemoteError::AccountInvalid(status)) => {
                    Some(SyncNotification::AccountUnavailable { status: *status })
                }
                Some(remote) if remote.requires_host_attention() => {
                    Some(SyncNotification::RemoteUnavailable {
                        reason: remote.to_string(),
                    })
                }
                _ => None,
            };
            if let Some(notification) = notification {
                if let Err(e) = self.notifier.notify(&notification).await {
                    warn!(error = %e, "Failed to notify host");
                }
            }
        }
        result
    }
}

fn log_failure(operation: &str, err: &SyncError) {
    match err {
        SyncError::Cancelled => debug!(operation, "Cancelled"),
        _ => error!(operation, error = %err, "Sync operation failed"),
    }
}
