use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::subscription_status::ProfileStatus;

/// Kind of account a user has on the site, stored as text in `users.account_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AccountType {
    Business,
    User,
}

/// Account flags on the `users` row. Fully derived from the business profile status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccountFlags {
    pub has_active_subscription: bool,
    pub account_type: AccountType,
}

impl UserAccountFlags {
    pub fn for_status(status: ProfileStatus) -> Self {
        let active = status.is_active();
        Self {
            has_active_subscription: active,
            account_type: if active {
                AccountType::Business
            } else {
                AccountType::User
            },
        }
    }

    /// Whether these flags agree with the given profile status.
    pub fn is_consistent_with(&self, status: ProfileStatus) -> bool {
        *self == Self::for_status(status)
    }
}
