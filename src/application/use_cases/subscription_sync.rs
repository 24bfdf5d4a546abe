use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use strum::AsRefStr;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::subscription_source::SubscriptionSource,
    domain::entities::{
        account::AccountType,
        subscription::{
            CorrectionScope, LocalSubscription, RemoteSubscription, StatusCorrection,
            SubscriptionImport, SubscriptionPeriod, WriteStep,
        },
        subscription_status::{ProfileStatus, RemoteStatus},
    },
};

// ============================================================================
// Repository Traits
// ============================================================================

/// A correction that could not be written. Names the write that failed.
#[derive(Error, Debug)]
#[error("write to {step} failed: {error}")]
pub struct WriteFailure {
    pub step: WriteStep,
    #[source]
    pub error: AppError,
}

#[async_trait]
pub trait SubscriptionSyncRepo: Send + Sync {
    /// Every subscription whose business profile and owning user exist.
    async fn list_linked(&self) -> AppResult<Vec<LocalSubscription>>;

    async fn get_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> AppResult<Option<LocalSubscription>>;

    /// Apply all writes of one correction. Implementations that can should make
    /// this atomic; the error names the first write that failed.
    async fn apply_correction(&self, correction: &StatusCorrection) -> Result<(), WriteFailure>;

    async fn list_audit_rows(&self) -> AppResult<Vec<SubscriptionAuditRow>>;

    /// Re-derive user account flags from business profile status wherever they
    /// disagree. Returns the number of users changed.
    async fn repair_account_flags(&self) -> AppResult<u64>;

    /// Store the Stripe customer id on a user. Returns false if the user does not exist.
    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> AppResult<bool>;

    /// The user a Stripe customer belongs to: matched by email first, then by
    /// the customer id stored on the user.
    async fn find_user_for_customer(
        &self,
        email: &str,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>>;

    /// Upsert the subscription row and business profile of one imported Stripe
    /// subscription and set its user's flags. The error names the first write
    /// that failed.
    async fn import_subscription(&self, import: &SubscriptionImport) -> Result<(), WriteFailure>;
}

// ============================================================================
// Profile Types
// ============================================================================

/// A subscription row with the profile and user columns shown in the drift report.
#[derive(Debug, Clone)]
pub struct SubscriptionAuditRow {
    pub subscription: LocalSubscription,
    pub business_name: Option<String>,
    pub user_email: Option<String>,
}

/// Counts reported by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub total: usize,
    pub updated: usize,
    pub already_correct: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::AlreadyCorrect => self.already_correct += 1,
            RecordOutcome::Updated { .. } => self.updated += 1,
            RecordOutcome::Failed(_) => self.errors += 1,
        }
    }
}

impl std::fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} updated={} alreadyCorrect={} skipped={} errors={}",
            self.total, self.updated, self.already_correct, self.skipped, self.errors
        )
    }
}

/// Why a single subscription could not be reconciled.
#[derive(Error, Debug, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReconcileFailure {
    #[error("Stripe subscription not found")]
    NotFoundRemote,

    #[error("No local subscription is linked to this Stripe subscription")]
    NotFoundLocal,

    #[error("Stripe lookup failed: {0}")]
    RemoteUnavailable(String),

    #[error("Local subscription lookup failed: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    WriteFailed(WriteFailure),
}

impl ReconcileFailure {
    pub fn reason(&self) -> &str {
        self.as_ref()
    }

    /// Whether retrying later could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileFailure::NotFoundRemote | ReconcileFailure::NotFoundLocal
        )
    }
}

#[derive(Debug)]
enum RecordOutcome {
    Skipped,
    AlreadyCorrect,
    Updated {
        from: Option<ProfileStatus>,
        to: ProfileStatus,
        scope: CorrectionScope,
    },
    Failed(ReconcileFailure),
}

/// Result of reconciling one subscription on demand.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleRecordOutcome {
    pub id: Uuid,
    pub stripe_id: String,
    pub stripe_status: RemoteStatus,
    pub mapped_status: ProfileStatus,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalAccountState {
    pub subscription_status: Option<ProfileStatus>,
    pub has_active_subscription: bool,
    pub account_type: Option<AccountType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteState {
    pub status: RemoteStatus,
    pub customer: Option<String>,
    #[serde(flatten)]
    pub period: SubscriptionPeriod,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    pub id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub business_name: Option<String>,
    pub business_id: Uuid,
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub local: LocalAccountState,
    pub remote: Option<RemoteState>,
    pub remote_error: Option<String>,
    pub correct_status: Option<ProfileStatus>,
    pub status_match: Option<bool>,
    pub user_status_match: Option<bool>,
    pub needs_update: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub subscriptions: Vec<DriftEntry>,
    pub needs_update: usize,
}

/// Maximum number of active Stripe subscriptions read by one import.
pub const IMPORT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub total: usize,
    pub synced: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Success,
    Error,
}

/// What happened to one Stripe subscription during an import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub subscription_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub status: ImportStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub stats: ImportStats,
    pub results: Vec<ImportResult>,
}

#[derive(Error, Debug)]
enum ImportFailure {
    #[error("No customer on subscription")]
    NoCustomer,

    #[error("Customer lookup failed: {0}")]
    CustomerLookup(AppError),

    #[error("No customer email")]
    NoEmail,

    #[error("User not found")]
    UserNotFound,

    #[error("User lookup failed: {0}")]
    UserLookup(AppError),

    #[error("Failed to write {}", .0.step)]
    Write(WriteFailure),
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct SubscriptionSyncUseCases {
    repo: Arc<dyn SubscriptionSyncRepo>,
    source: Arc<dyn SubscriptionSource>,
}

impl SubscriptionSyncUseCases {
    pub fn new(repo: Arc<dyn SubscriptionSyncRepo>, source: Arc<dyn SubscriptionSource>) -> Self {
        Self { repo, source }
    }

    pub async fn check_source(&self) -> AppResult<()> {
        self.source.check_connection().await
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Reconcile every linked subscription against Stripe, one at a time.
    ///
    /// Only the initial listing can fail the pass. Each record's failure is
    /// logged and counted under `errors`.
    pub async fn run_batch(&self) -> AppResult<ReconcileSummary> {
        let subscriptions = self.list_linked().await?;
        Ok(self.reconcile_all(&subscriptions).await)
    }

    pub async fn list_linked(&self) -> AppResult<Vec<LocalSubscription>> {
        self.repo.list_linked().await
    }

    /// Reconcile already listed subscriptions, one at a time.
    pub async fn reconcile_all(&self, subscriptions: &[LocalSubscription]) -> ReconcileSummary {
        let mut summary = ReconcileSummary {
            total: subscriptions.len(),
            ..Default::default()
        };

        info!(total = summary.total, "Starting subscription reconciliation");

        for local in subscriptions {
            let outcome = self.reconcile_record(local).await;
            log_outcome(local, &outcome);
            summary.record(&outcome);
        }

        info!(
            total = summary.total,
            updated = summary.updated,
            already_correct = summary.already_correct,
            skipped = summary.skipped,
            errors = summary.errors,
            "Subscription reconciliation finished"
        );

        summary
    }

    async fn reconcile_record(&self, local: &LocalSubscription) -> RecordOutcome {
        let Some(remote_id) = local.remote_id() else {
            return RecordOutcome::Skipped;
        };

        let remote = match self.fetch_remote(remote_id).await {
            Ok(remote) => remote,
            Err(failure) => return RecordOutcome::Failed(failure),
        };

        match self.apply(local, &remote).await {
            Ok(Some(correction)) => RecordOutcome::Updated {
                from: local.profile_status,
                to: correction.status,
                scope: correction.scope,
            },
            Ok(None) => RecordOutcome::AlreadyCorrect,
            Err(failure) => RecordOutcome::Failed(failure),
        }
    }

    // ========================================================================
    // Single record
    // ========================================================================

    /// Fetch one Stripe subscription and reconcile the local record linked to it.
    pub async fn reconcile_one(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<SingleRecordOutcome, ReconcileFailure> {
        let remote = self.fetch_remote(stripe_subscription_id).await?;
        self.reconcile_remote(&remote).await
    }

    /// Reconcile the local record linked to an already fetched Stripe subscription.
    pub async fn reconcile_remote(
        &self,
        remote: &RemoteSubscription,
    ) -> Result<SingleRecordOutcome, ReconcileFailure> {
        let local = self
            .repo
            .get_by_stripe_subscription_id(&remote.id)
            .await
            .map_err(|e| ReconcileFailure::StoreUnavailable(e.to_string()))?
            .ok_or(ReconcileFailure::NotFoundLocal)?;

        let changed = self.apply(&local, remote).await?;
        if let Some(correction) = &changed {
            info!(
                subscription_id = %local.id,
                stripe_subscription_id = %remote.id,
                from = ?local.profile_status,
                to = %correction.status,
                scope = correction.scope.as_ref(),
                "Subscription corrected"
            );
        }

        Ok(SingleRecordOutcome {
            id: local.id,
            stripe_id: remote.id.clone(),
            stripe_status: remote.status.clone(),
            mapped_status: remote.mapped_status(),
            changed: changed.is_some(),
        })
    }

    // ========================================================================
    // Reporting and repair
    // ========================================================================

    /// Compare every subscription with Stripe without writing anything.
    pub async fn audit(&self) -> AppResult<DriftReport> {
        let rows = self.repo.list_audit_rows().await?;
        let mut subscriptions = Vec::with_capacity(rows.len());

        for row in rows {
            let remote = match row.subscription.remote_id() {
                Some(remote_id) => Some(self.source.get_subscription(remote_id).await),
                None => None,
            };
            subscriptions.push(drift_entry(row, remote));
        }

        let needs_update = subscriptions.iter().filter(|e| e.needs_update).count();
        Ok(DriftReport {
            subscriptions,
            needs_update,
        })
    }

    pub async fn repair_account_flags(&self) -> AppResult<u64> {
        let repaired = self.repo.repair_account_flags().await?;
        info!(repaired, "Account flags repaired");
        Ok(repaired)
    }

    pub async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> AppResult<bool> {
        let linked = self.repo.link_stripe_customer(user_id, customer_id).await?;
        if !linked {
            warn!(%user_id, customer_id, "No user to link Stripe customer to");
        }
        Ok(linked)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Bring every active Stripe subscription into the local tables.
    ///
    /// Each subscription is matched to a user through its customer's email or
    /// stored customer id; its subscription row and business profile are
    /// created or updated and the user's flags set. Only the listing can fail
    /// the import; per-subscription failures are reported in the results.
    pub async fn import_active(&self) -> AppResult<ImportReport> {
        let subscriptions = self.source.list_active(IMPORT_LIMIT).await?;
        let mut stats = ImportStats {
            total: subscriptions.len(),
            ..Default::default()
        };
        let mut results = Vec::with_capacity(subscriptions.len());

        info!(total = stats.total, "Starting Stripe subscription import");

        for remote in &subscriptions {
            let result = self.import_one(remote).await;
            match result.status {
                ImportStatus::Success => stats.synced += 1,
                ImportStatus::Error => stats.errors += 1,
            }
            results.push(result);
        }

        info!(
            total = stats.total,
            synced = stats.synced,
            errors = stats.errors,
            "Stripe subscription import finished"
        );

        Ok(ImportReport { stats, results })
    }

    async fn import_one(&self, remote: &RemoteSubscription) -> ImportResult {
        let mut customer_email = None;
        let outcome = self.try_import(remote, &mut customer_email).await;

        let (status, message) = match outcome {
            Ok(()) => {
                info!(stripe_subscription_id = %remote.id, "Imported Stripe subscription");
                (ImportStatus::Success, "Successfully synced".to_string())
            }
            Err(failure) => {
                warn!(
                    stripe_subscription_id = %remote.id,
                    customer_email = customer_email.as_deref().unwrap_or("-"),
                    error = %failure,
                    "Stripe subscription not imported"
                );
                (ImportStatus::Error, failure.to_string())
            }
        };

        ImportResult {
            subscription_id: remote.id.clone(),
            customer_email,
            status,
            message,
        }
    }

    async fn try_import(
        &self,
        remote: &RemoteSubscription,
        customer_email: &mut Option<String>,
    ) -> Result<(), ImportFailure> {
        let customer_id = remote.customer.as_deref().ok_or(ImportFailure::NoCustomer)?;
        let customer = self
            .source
            .get_customer(customer_id)
            .await
            .map_err(ImportFailure::CustomerLookup)?;
        let email = customer.email().ok_or(ImportFailure::NoEmail)?;
        *customer_email = Some(email.to_string());

        let user_id = self
            .repo
            .find_user_for_customer(email, &customer.id)
            .await
            .map_err(ImportFailure::UserLookup)?
            .ok_or(ImportFailure::UserNotFound)?;

        let import = SubscriptionImport::plan(user_id, remote, &customer);
        self.repo
            .import_subscription(&import)
            .await
            .map_err(ImportFailure::Write)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn fetch_remote(&self, remote_id: &str) -> Result<RemoteSubscription, ReconcileFailure> {
        self.source
            .get_subscription(remote_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound => ReconcileFailure::NotFoundRemote,
                other => ReconcileFailure::RemoteUnavailable(other.to_string()),
            })
    }

    /// Write the correction if one is needed. Returns the correction applied.
    async fn apply(
        &self,
        local: &LocalSubscription,
        remote: &RemoteSubscription,
    ) -> Result<Option<StatusCorrection>, ReconcileFailure> {
        let Some(correction) = StatusCorrection::plan(local, remote) else {
            return Ok(None);
        };

        self.repo
            .apply_correction(&correction)
            .await
            .map_err(ReconcileFailure::WriteFailed)?;

        Ok(Some(correction))
    }
}

fn log_outcome(local: &LocalSubscription, outcome: &RecordOutcome) {
    let stripe_subscription_id = local.remote_id().unwrap_or("-");
    match outcome {
        RecordOutcome::Skipped => info!(
            subscription_id = %local.id,
            "Skipped subscription without Stripe id"
        ),
        RecordOutcome::AlreadyCorrect => info!(
            subscription_id = %local.id,
            stripe_subscription_id,
            "Subscription already correct"
        ),
        RecordOutcome::Updated { from, to, scope } => info!(
            subscription_id = %local.id,
            stripe_subscription_id,
            from = from.map(|s| s.as_ref().to_string()).unwrap_or_else(|| "null".into()),
            to = %to,
            scope = scope.as_ref(),
            "Subscription updated"
        ),
        RecordOutcome::Failed(failure) => warn!(
            subscription_id = %local.id,
            stripe_subscription_id,
            reason = failure.reason(),
            error = %failure,
            "Subscription reconciliation failed"
        ),
    }
}

fn drift_entry(
    row: SubscriptionAuditRow,
    remote: Option<AppResult<RemoteSubscription>>,
) -> DriftEntry {
    let local = LocalAccountState {
        subscription_status: row.subscription.profile_status,
        has_active_subscription: row.subscription.has_active_subscription,
        account_type: row.subscription.account_type,
    };

    let (remote, remote_error) = match remote {
        Some(Ok(remote)) => (Some(remote), None),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, None),
    };

    let correct_status = remote.as_ref().map(RemoteSubscription::mapped_status);
    let status_match = correct_status.map(|s| row.subscription.profile_status == Some(s));
    let user_status_match = correct_status.map(|s| row.subscription.flags_consistent_with(s));
    let needs_update = status_match == Some(false) || user_status_match == Some(false);

    DriftEntry {
        id: row.subscription.id,
        stripe_subscription_id: row.subscription.stripe_subscription_id.clone(),
        business_name: row.business_name,
        business_id: row.subscription.business_profile_id,
        user_id: row.subscription.user_id,
        user_email: row.user_email,
        local,
        remote: remote.map(|r| RemoteState {
            status: r.status,
            customer: r.customer,
            period: r.period,
        }),
        remote_error,
        correct_status,
        status_match,
        user_status_match,
        needs_update,
    }
}
