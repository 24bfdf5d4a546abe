//! Test data factories.
//!
//! Each factory creates a complete, valid object. Use the closure parameter to
//! override specific fields.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::{
    account::UserAccountFlags,
    subscription::{RemoteCustomer, RemoteSubscription, SubscriptionPeriod},
    subscription_status::{ProfileStatus, RemoteStatus},
};

/// The `subscriptions` row as the in-memory store keeps it.
#[derive(Debug, Clone)]
pub struct StoredSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: Option<String>,
    pub status: Option<String>,
    pub period: SubscriptionPeriod,
}

/// The subscription fields of a `business_profiles` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_status: Option<ProfileStatus>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

/// One subscription together with its business profile and owning user.
#[derive(Debug, Clone)]
pub struct TestAccount {
    pub subscription: StoredSubscription,
    pub profile: StoredProfile,
    pub business_name: String,
    pub user_email: String,
    pub flags: UserAccountFlags,
    pub stripe_customer_id: Option<String>,
}

/// Create an active, consistent account linked to `sub_a`.
pub fn create_test_account(overrides: impl FnOnce(&mut TestAccount)) -> TestAccount {
    let user_id = Uuid::new_v4();
    let mut account = TestAccount {
        subscription: StoredSubscription {
            id: Uuid::new_v4(),
            user_id,
            stripe_subscription_id: Some("sub_a".to_string()),
            status: Some("active".to_string()),
            period: SubscriptionPeriod {
                start: Some(test_datetime()),
                end: Some(test_datetime_offset_days(30)),
            },
        },
        profile: StoredProfile {
            id: Uuid::new_v4(),
            user_id,
            subscription_status: Some(ProfileStatus::Active),
            subscription_start_date: Some(test_datetime()),
            subscription_end_date: Some(test_datetime_offset_days(30)),
        },
        business_name: "Café Centro".to_string(),
        user_email: format!("owner-{}@example.com", user_id.simple()),
        flags: UserAccountFlags::for_status(ProfileStatus::Active),
        stripe_customer_id: Some("cus_test".to_string()),
    };
    overrides(&mut account);
    account
}

/// Create a Stripe subscription with a fixed November 2023 billing period.
pub fn create_test_remote(
    id: &str,
    status: &str,
    overrides: impl FnOnce(&mut RemoteSubscription),
) -> RemoteSubscription {
    let mut remote = RemoteSubscription {
        id: id.to_string(),
        customer: Some("cus_test".to_string()),
        status: RemoteStatus::from_stripe(status),
        period: SubscriptionPeriod {
            start: DateTime::from_timestamp(1_700_000_000, 0),
            end: DateTime::from_timestamp(1_702_592_000, 0),
        },
    };
    overrides(&mut remote);
    remote
}

pub fn create_test_customer(
    id: &str,
    email: Option<&str>,
    overrides: impl FnOnce(&mut RemoteCustomer),
) -> RemoteCustomer {
    let mut customer = RemoteCustomer {
        id: id.to_string(),
        email: email.map(str::to_string),
        name: None,
    };
    overrides(&mut customer);
    customer
}

/// Fixed datetime for deterministic tests.
pub fn test_datetime() -> DateTime<Utc> {
    DateTime::from_timestamp(1_672_531_200, 0).unwrap_or_default()
}

pub fn test_datetime_offset_days(days: i64) -> DateTime<Utc> {
    test_datetime() + chrono::Duration::days(days)
}
