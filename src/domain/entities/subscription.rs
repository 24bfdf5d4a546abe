use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use uuid::Uuid;

use super::{
    account::{AccountType, UserAccountFlags},
    subscription_status::{ProfileStatus, RemoteStatus},
};

/// A `subscriptions` row joined with its business profile and owning user.
///
/// Only rows whose business profile and owning user both exist are ever loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub business_profile_id: Uuid,
    /// `NULL` in the database is treated as drift and always corrected.
    pub profile_status: Option<ProfileStatus>,
    pub has_active_subscription: bool,
    /// `None` when the stored value is `NULL` or unrecognized.
    pub account_type: Option<AccountType>,
}

impl LocalSubscription {
    /// The remote id, ignoring blank values.
    pub fn remote_id(&self) -> Option<&str> {
        self.stripe_subscription_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn account_flags(&self) -> Option<UserAccountFlags> {
        self.account_type.map(|account_type| UserAccountFlags {
            has_active_subscription: self.has_active_subscription,
            account_type,
        })
    }

    /// Whether the owning user's flags agree with `status`. Unknown flags never do.
    pub fn flags_consistent_with(&self, status: ProfileStatus) -> bool {
        self.account_flags()
            .is_some_and(|flags| flags.is_consistent_with(status))
    }
}

/// Billing period boundaries of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SubscriptionPeriod {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Subscription as reported by Stripe, after typed parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: RemoteStatus,
    pub period: SubscriptionPeriod,
}

impl RemoteSubscription {
    pub fn mapped_status(&self) -> ProfileStatus {
        self.status.profile_status()
    }
}

/// A Stripe customer, reduced to what is needed to find its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl RemoteCustomer {
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    /// Name for a business profile created from this customer: the customer
    /// name, else the local part of the email.
    pub fn business_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.email().and_then(|email| email.split('@').next())))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Which tables a correction rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CorrectionScope {
    /// Profile status changes: profile, user flags and subscription row.
    Status,
    /// Profile status already matches; only the user's flags are stale.
    AccountFlags,
}

/// Writes needed to bring one local subscription in line with Stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCorrection {
    pub scope: CorrectionScope,
    pub subscription_id: Uuid,
    pub business_profile_id: Uuid,
    pub user_id: Uuid,
    pub status: ProfileStatus,
    /// New profile start/end dates. Only set when the new status is active.
    pub profile_period: Option<SubscriptionPeriod>,
    pub flags: UserAccountFlags,
    /// Period mirrored onto the `subscriptions` row.
    pub subscription_period: SubscriptionPeriod,
}

impl StatusCorrection {
    /// Plan the correction for `local`, or `None` when its profile status and
    /// user flags already match `remote`.
    pub fn plan(local: &LocalSubscription, remote: &RemoteSubscription) -> Option<Self> {
        let status = remote.mapped_status();
        let scope = if local.profile_status != Some(status) {
            CorrectionScope::Status
        } else if !local.flags_consistent_with(status) {
            CorrectionScope::AccountFlags
        } else {
            return None;
        };

        Some(Self {
            scope,
            subscription_id: local.id,
            business_profile_id: local.business_profile_id,
            user_id: local.user_id,
            status,
            profile_period: (scope == CorrectionScope::Status && status.is_active())
                .then_some(remote.period),
            flags: UserAccountFlags::for_status(status),
            subscription_period: remote.period,
        })
    }
}

/// Fallback name for a business profile created by an import.
const DEFAULT_BUSINESS_NAME: &str = "Business";

/// Writes that bring one Stripe subscription into the local tables, creating
/// the `subscriptions` row and the business profile when they are missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionImport {
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub status: ProfileStatus,
    /// New profile start/end dates. Only set when the status is active.
    pub profile_period: Option<SubscriptionPeriod>,
    pub flags: UserAccountFlags,
    pub subscription_period: SubscriptionPeriod,
    /// Only used when the user has no business profile yet.
    pub business_name: String,
}

impl SubscriptionImport {
    pub fn plan(user_id: Uuid, remote: &RemoteSubscription, customer: &RemoteCustomer) -> Self {
        let status = remote.mapped_status();
        Self {
            user_id,
            stripe_subscription_id: remote.id.clone(),
            stripe_customer_id: customer.id.clone(),
            status,
            profile_period: status.is_active().then_some(remote.period),
            flags: UserAccountFlags::for_status(status),
            subscription_period: remote.period,
            business_name: customer
                .business_name()
                .unwrap_or(DEFAULT_BUSINESS_NAME)
                .to_string(),
        }
    }
}

/// The individual write of a correction, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WriteStep {
    BusinessProfile,
    AccountFlags,
    Subscription,
}
