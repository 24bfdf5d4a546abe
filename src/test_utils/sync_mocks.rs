//! In-memory mocks for the subscription store and Stripe.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use super::factories::{StoredSubscription, TestAccount};
use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::subscription_source::SubscriptionSource,
        use_cases::subscription_sync::{SubscriptionAuditRow, SubscriptionSyncRepo, WriteFailure},
    },
    domain::entities::{
        account::UserAccountFlags,
        subscription::{
            CorrectionScope, LocalSubscription, RemoteCustomer, RemoteSubscription,
            StatusCorrection, SubscriptionImport, SubscriptionPeriod, WriteStep,
        },
        subscription_status::RemoteStatus,
    },
};

// ============================================================================
// InMemorySubscriptionSyncRepo
// ============================================================================

/// Keeps subscriptions, profiles and users together, keyed by subscription id.
/// Accounts sharing a `user_id` stand for one user and one business profile.
///
/// Corrections and imports apply all-or-nothing. `fail_on` makes the next ones
/// fail at the given step without changing anything.
#[derive(Default)]
pub struct InMemorySubscriptionSyncRepo {
    pub accounts: Mutex<HashMap<Uuid, TestAccount>>,
    missing_profiles: Mutex<HashSet<Uuid>>,
    fail_on: Mutex<Option<WriteStep>>,
    fail_listing: AtomicBool,
    writes: AtomicUsize,
}

impl InMemorySubscriptionSyncRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<TestAccount>) -> Self {
        let map = accounts
            .into_iter()
            .map(|a| (a.subscription.id, a))
            .collect();
        Self {
            accounts: Mutex::new(map),
            ..Default::default()
        }
    }

    pub fn account(&self, subscription_id: Uuid) -> TestAccount {
        self.accounts
            .lock()
            .unwrap()
            .get(&subscription_id)
            .cloned()
            .expect("account exists")
    }

    pub fn account_by_stripe_id(&self, stripe_subscription_id: &str) -> Option<TestAccount> {
        self.accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.subscription.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .cloned()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().unwrap().len()
    }

    /// Make the account's business profile disappear from joins.
    pub fn remove_profile(&self, subscription_id: Uuid) {
        self.missing_profiles.lock().unwrap().insert(subscription_id);
    }

    pub fn fail_on(&self, step: WriteStep) {
        *self.fail_on.lock().unwrap() = Some(step);
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    /// Number of corrections and imports successfully applied.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn linked(&self) -> Vec<TestAccount> {
        let missing = self.missing_profiles.lock().unwrap();
        let mut accounts: Vec<_> = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| !missing.contains(&a.subscription.id))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.subscription.id);
        accounts
    }
}

fn to_local(account: &TestAccount) -> LocalSubscription {
    LocalSubscription {
        id: account.subscription.id,
        user_id: account.subscription.user_id,
        stripe_subscription_id: account.subscription.stripe_subscription_id.clone(),
        business_profile_id: account.profile.id,
        profile_status: account.profile.subscription_status,
        has_active_subscription: account.flags.has_active_subscription,
        account_type: Some(account.flags.account_type),
    }
}

fn injected_failure(step: WriteStep) -> WriteFailure {
    WriteFailure {
        step,
        error: AppError::Database("injected failure".into()),
    }
}

#[async_trait]
impl SubscriptionSyncRepo for InMemorySubscriptionSyncRepo {
    async fn list_linked(&self) -> AppResult<Vec<LocalSubscription>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection refused".into()));
        }
        Ok(self.linked().iter().map(to_local).collect())
    }

    async fn get_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> AppResult<Option<LocalSubscription>> {
        Ok(self
            .linked()
            .iter()
            .find(|a| a.subscription.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .map(to_local))
    }

    async fn apply_correction(&self, correction: &StatusCorrection) -> Result<(), WriteFailure> {
        if let Some(step) = *self.fail_on.lock().unwrap() {
            return Err(injected_failure(step));
        }

        let mut accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get_mut(&correction.subscription_id) else {
            return Err(WriteFailure {
                step: WriteStep::BusinessProfile,
                error: AppError::NotFound,
            });
        };

        account.flags = correction.flags;
        if correction.scope == CorrectionScope::Status {
            account.profile.subscription_status = Some(correction.status);
            if let Some(period) = correction.profile_period {
                account.profile.subscription_start_date = period.start;
                account.profile.subscription_end_date = period.end;
            }
            account.subscription.status = Some(correction.status.to_string());
            account.subscription.period = correction.subscription_period;
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_audit_rows(&self) -> AppResult<Vec<SubscriptionAuditRow>> {
        Ok(self
            .linked()
            .iter()
            .map(|a| SubscriptionAuditRow {
                subscription: to_local(a),
                business_name: Some(a.business_name.clone()),
                user_email: Some(a.user_email.clone()),
            })
            .collect())
    }

    async fn repair_account_flags(&self) -> AppResult<u64> {
        let mut repaired = 0;
        for account in self.accounts.lock().unwrap().values_mut() {
            let Some(status) = account.profile.subscription_status else {
                continue;
            };
            if !account.flags.is_consistent_with(status) {
                account.flags = UserAccountFlags::for_status(status);
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> AppResult<bool> {
        let mut linked = false;
        for account in self.accounts.lock().unwrap().values_mut() {
            if account.subscription.user_id == user_id {
                account.stripe_customer_id = Some(customer_id.to_string());
                linked = true;
            }
        }
        Ok(linked)
    }

    async fn find_user_for_customer(
        &self,
        email: &str,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let accounts = self.accounts.lock().unwrap();
        let by_email = accounts.values().find(|a| a.user_email == email);
        let by_customer = || {
            accounts
                .values()
                .find(|a| a.stripe_customer_id.as_deref() == Some(customer_id))
        };
        Ok(by_email.or_else(by_customer).map(|a| a.subscription.user_id))
    }

    async fn import_subscription(&self, import: &SubscriptionImport) -> Result<(), WriteFailure> {
        if let Some(step) = *self.fail_on.lock().unwrap() {
            return Err(injected_failure(step));
        }

        let mut accounts = self.accounts.lock().unwrap();
        let Some(template) = accounts
            .values()
            .find(|a| a.subscription.user_id == import.user_id)
            .cloned()
        else {
            return Err(WriteFailure {
                step: WriteStep::AccountFlags,
                error: AppError::NotFound,
            });
        };

        let existing = accounts
            .values()
            .find(|a| {
                a.subscription.stripe_subscription_id.as_deref()
                    == Some(import.stripe_subscription_id.as_str())
            })
            .map(|a| a.subscription.id);
        let subscription_id = existing.unwrap_or_else(|| {
            let mut created = template;
            created.subscription = StoredSubscription {
                id: Uuid::new_v4(),
                user_id: import.user_id,
                stripe_subscription_id: Some(import.stripe_subscription_id.clone()),
                status: None,
                period: SubscriptionPeriod::default(),
            };
            let id = created.subscription.id;
            accounts.insert(id, created);
            id
        });

        if let Some(account) = accounts.get_mut(&subscription_id) {
            account.subscription.user_id = import.user_id;
            account.subscription.status = Some(import.status.to_string());
            account.subscription.period = import.subscription_period;
        }

        let mut missing = self.missing_profiles.lock().unwrap();
        for account in accounts
            .values_mut()
            .filter(|a| a.subscription.user_id == import.user_id)
        {
            if missing.remove(&account.subscription.id) {
                account.business_name = import.business_name.clone();
            }
            account.profile.subscription_status = Some(import.status);
            if let Some(period) = import.profile_period {
                account.profile.subscription_start_date = period.start;
                account.profile.subscription_end_date = period.end;
            }
            account.flags = import.flags;
            account
                .stripe_customer_id
                .get_or_insert_with(|| import.stripe_customer_id.clone());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// StubSubscriptionSource
// ============================================================================

/// Stripe stand-in. Unknown ids are `NotFound`; subscription or customer ids
/// passed to `fail_for` fail with a remote error.
#[derive(Default)]
pub struct StubSubscriptionSource {
    pub subscriptions: Mutex<HashMap<String, RemoteSubscription>>,
    pub customers: Mutex<HashMap<String, RemoteCustomer>>,
    failing: Mutex<HashSet<String>>,
    connection_down: AtomicBool,
    lookups: AtomicUsize,
}

impl StubSubscriptionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(subscriptions: Vec<RemoteSubscription>) -> Self {
        let map = subscriptions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Self {
            subscriptions: Mutex::new(map),
            ..Default::default()
        }
    }

    pub fn add_customer(&self, customer: RemoteCustomer) {
        self.customers
            .lock()
            .unwrap()
            .insert(customer.id.clone(), customer);
    }

    pub fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    fn check_failing(&self, id: &str) -> AppResult<()> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(AppError::Remote("Stripe API error (503)".into()));
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        self.connection_down.store(true, Ordering::SeqCst);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionSource for StubSubscriptionSource {
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<RemoteSubscription> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_failing(subscription_id)?;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn list_active(&self, limit: u32) -> AppResult<Vec<RemoteSubscription>> {
        self.check_connection().await?;
        let mut active: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == RemoteStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active.truncate(limit as usize);
        Ok(active)
    }

    async fn get_customer(&self, customer_id: &str) -> AppResult<RemoteCustomer> {
        self.check_failing(customer_id)?;
        self.customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn check_connection(&self) -> AppResult<()> {
        if self.connection_down.load(Ordering::SeqCst) {
            return Err(AppError::Remote("connection refused".into()));
        }
        Ok(())
    }
}
