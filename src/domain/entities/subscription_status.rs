use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Subscription status stored on a business profile.
///
/// This is the coarse, site-local view of a subscription. It is derived from the
/// Stripe status with [`map_status`] and drives the user's account flags.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    AsRefStr,
    Display,
    EnumString,
)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProfileStatus {
    Active,
    Canceled,
    Inactive,
}

impl ProfileStatus {
    /// Whether the profile grants business features.
    pub fn is_active(&self) -> bool {
        matches!(self, ProfileStatus::Active)
    }
}

/// Map a raw Stripe subscription status onto the profile status.
///
/// Total over every input: anything that is not explicitly active or terminal
/// (`past_due`, `incomplete`, unknown values, the empty string) is `inactive`.
/// `trialing` grants access the same way `active` does.
pub fn map_status(remote_status: &str) -> ProfileStatus {
    match remote_status {
        "active" | "trialing" => ProfileStatus::Active,
        "canceled" | "unpaid" => ProfileStatus::Canceled,
        _ => ProfileStatus::Inactive,
    }
}

/// Subscription status as reported by Stripe.
///
/// Unknown values are kept verbatim in [`RemoteStatus::Other`] so they can be
/// logged and reported without losing information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    Other(String),
}

impl RemoteStatus {
    pub fn from_stripe(s: &str) -> Self {
        match s {
            "active" => RemoteStatus::Active,
            "trialing" => RemoteStatus::Trialing,
            "past_due" => RemoteStatus::PastDue,
            "canceled" => RemoteStatus::Canceled,
            "unpaid" => RemoteStatus::Unpaid,
            "incomplete" => RemoteStatus::Incomplete,
            "incomplete_expired" => RemoteStatus::IncompleteExpired,
            "paused" => RemoteStatus::Paused,
            other => RemoteStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Active => "active",
            RemoteStatus::Trialing => "trialing",
            RemoteStatus::PastDue => "past_due",
            RemoteStatus::Canceled => "canceled",
            RemoteStatus::Unpaid => "unpaid",
            RemoteStatus::Incomplete => "incomplete",
            RemoteStatus::IncompleteExpired => "incomplete_expired",
            RemoteStatus::Paused => "paused",
            RemoteStatus::Other(s) => s.as_str(),
        }
    }

    /// The profile status this remote status maps to.
    pub fn profile_status(&self) -> ProfileStatus {
        map_status(self.as_str())
    }
}

impl From<String> for RemoteStatus {
    fn from(s: String) -> Self {
        RemoteStatus::from_stripe(&s)
    }
}

impl From<RemoteStatus> for String {
    fn from(status: RemoteStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
