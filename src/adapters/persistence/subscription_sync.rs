use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::subscription_sync::{
        SubscriptionAuditRow, SubscriptionSyncRepo, WriteFailure,
    },
    domain::entities::{
        account::AccountType,
        subscription::{
            CorrectionScope, LocalSubscription, StatusCorrection, SubscriptionImport, WriteStep,
        },
        subscription_status::ProfileStatus,
    },
};

// Profiles and users are joined on the subscription's owner. Rows without a
// business profile or user are left out entirely.
const LINKED_FROM: &str = r#"
    FROM subscriptions s
    INNER JOIN business_profiles bp ON bp.user_id = s.user_id
    INNER JOIN users u ON u.id = s.user_id
"#;

const SELECT_COLS: &str = r#"
    s.id, s.user_id, s.stripe_subscription_id,
    bp.id AS business_profile_id, bp.subscription_status::text AS profile_status,
    u.has_active_subscription, u.account_type
"#;

const IMPORTED_PROFILE_DESCRIPTION: &str = "Business profile created from subscription sync";
const IMPORTED_PROFILE_CATEGORY: &str = "General";

/// Parse a stored enum value. Unknown text is treated like `NULL` so the next
/// pass overwrites it.
fn parse_stored<T: std::str::FromStr>(raw: Option<String>, column: &str, id: Uuid) -> Option<T> {
    let raw = raw?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                column,
                subscription_id = %id,
                value = %raw,
                "Unrecognized stored value, treating as unset"
            );
            None
        }
    }
}

fn row_to_local(row: &sqlx::postgres::PgRow) -> AppResult<LocalSubscription> {
    let id: Uuid = row.try_get("id")?;
    Ok(LocalSubscription {
        id,
        user_id: row.try_get("user_id")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        business_profile_id: row.try_get("business_profile_id")?,
        profile_status: parse_stored::<ProfileStatus>(
            row.try_get("profile_status")?,
            "subscription_status",
            id,
        ),
        has_active_subscription: row
            .try_get::<Option<bool>, _>("has_active_subscription")?
            .unwrap_or(false),
        account_type: parse_stored::<AccountType>(row.try_get("account_type")?, "account_type", id),
    })
}

fn row_to_audit(row: &sqlx::postgres::PgRow) -> AppResult<SubscriptionAuditRow> {
    Ok(SubscriptionAuditRow {
        subscription: row_to_local(row)?,
        business_name: row.try_get("business_name")?,
        user_email: row.try_get("email")?,
    })
}

fn write_failed(step: WriteStep) -> impl FnOnce(sqlx::Error) -> WriteFailure {
    move |err| WriteFailure {
        step,
        error: AppError::from(err),
    }
}

#[async_trait]
impl SubscriptionSyncRepo for PostgresPersistence {
    async fn list_linked(&self) -> AppResult<Vec<LocalSubscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLS} {LINKED_FROM} ORDER BY s.created_at, s.id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        rows.iter().map(row_to_local).collect()
    }

    async fn get_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> AppResult<Option<LocalSubscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} {LINKED_FROM} WHERE s.stripe_subscription_id = $1 LIMIT 1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        row.as_ref().map(row_to_local).transpose()
    }

    async fn apply_correction(&self, correction: &StatusCorrection) -> Result<(), WriteFailure> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(write_failed(WriteStep::BusinessProfile))?;

        let rewrites_status = correction.scope == CorrectionScope::Status;

        if rewrites_status {
            let profile_update = match correction.profile_period {
                Some(period) => {
                    sqlx::query(
                        r#"
                        UPDATE business_profiles
                        SET subscription_status = $2,
                            subscription_start_date = $3,
                            subscription_end_date = $4,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(correction.business_profile_id)
                    .bind(correction.status)
                    .bind(period.start)
                    .bind(period.end)
                    .execute(&mut *tx)
                    .await
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE business_profiles
                        SET subscription_status = $2, updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(correction.business_profile_id)
                    .bind(correction.status)
                    .execute(&mut *tx)
                    .await
                }
            };
            profile_update.map_err(write_failed(WriteStep::BusinessProfile))?;
        }

        sqlx::query(
            r#"
            UPDATE users
            SET has_active_subscription = $2, account_type = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(correction.user_id)
        .bind(correction.flags.has_active_subscription)
        .bind(correction.flags.account_type.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(write_failed(WriteStep::AccountFlags))?;

        if rewrites_status {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = $2,
                    current_period_start = $3,
                    current_period_end = $4,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(correction.subscription_id)
            .bind(correction.status.as_ref())
            .bind(correction.subscription_period.start)
            .bind(correction.subscription_period.end)
            .execute(&mut *tx)
            .await
            .map_err(write_failed(WriteStep::Subscription))?;
        }

        tx.commit()
            .await
            .map_err(write_failed(WriteStep::Subscription))
    }

    async fn list_audit_rows(&self) -> AppResult<Vec<SubscriptionAuditRow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLS}, bp.business_name, u.email
            {LINKED_FROM}
            ORDER BY s.created_at DESC, s.id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        rows.iter().map(row_to_audit).collect()
    }

    async fn repair_account_flags(&self) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users u
            SET has_active_subscription = (bp.subscription_status = 'active'),
                account_type = CASE
                    WHEN bp.subscription_status = 'active' THEN 'business'
                    ELSE 'user'
                END,
                updated_at = NOW()
            FROM business_profiles bp
            WHERE bp.user_id = u.id
              AND bp.subscription_status IS NOT NULL
              AND (
                u.has_active_subscription IS DISTINCT FROM (bp.subscription_status = 'active')
                OR u.account_type IS DISTINCT FROM CASE
                    WHEN bp.subscription_status = 'active' THEN 'business'
                    ELSE 'user'
                END
              )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }

    async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_user_for_customer(
        &self,
        email: &str,
        customer_id: &str,
    ) -> AppResult<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM users
            WHERE email = $1 OR stripe_customer_id = $2
            ORDER BY (email = $1) IS TRUE DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        row.map(|r| r.try_get::<Uuid, _>("id").map_err(AppError::from))
            .transpose()
    }

    async fn import_subscription(&self, import: &SubscriptionImport) -> Result<(), WriteFailure> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(write_failed(WriteStep::Subscription))?;

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET user_id = $2,
                status = $3,
                current_period_start = $4,
                current_period_end = $5,
                stripe_customer_id = $6,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(&import.stripe_subscription_id)
        .bind(import.user_id)
        .bind(import.status.as_ref())
        .bind(import.subscription_period.start)
        .bind(import.subscription_period.end)
        .bind(&import.stripe_customer_id)
        .execute(&mut *tx)
        .await
        .map_err(write_failed(WriteStep::Subscription))?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO subscriptions (
                    user_id, plan_id, status, current_period_start, current_period_end,
                    stripe_subscription_id, stripe_customer_id, created_at, updated_at
                )
                VALUES (
                    $1, (SELECT id FROM subscription_plans WHERE is_active LIMIT 1),
                    $2, $3, $4, $5, $6, NOW(), NOW()
                )
                "#,
            )
            .bind(import.user_id)
            .bind(import.status.as_ref())
            .bind(import.subscription_period.start)
            .bind(import.subscription_period.end)
            .bind(&import.stripe_subscription_id)
            .bind(&import.stripe_customer_id)
            .execute(&mut *tx)
            .await
            .map_err(write_failed(WriteStep::Subscription))?;
        }

        let (start, end) = import
            .profile_period
            .map(|p| (p.start, p.end))
            .unwrap_or_default();

        let updated = sqlx::query(
            r#"
            UPDATE business_profiles
            SET subscription_status = $2,
                subscription_id = $3,
                subscription_start_date = COALESCE($4, subscription_start_date),
                subscription_end_date = COALESCE($5, subscription_end_date),
                stripe_customer_id = $6,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(import.user_id)
        .bind(import.status)
        .bind(&import.stripe_subscription_id)
        .bind(start)
        .bind(end)
        .bind(&import.stripe_customer_id)
        .execute(&mut *tx)
        .await
        .map_err(write_failed(WriteStep::BusinessProfile))?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO business_profiles (
                    user_id, business_name, business_description, business_category,
                    subscription_status, subscription_id, subscription_start_date,
                    subscription_end_date, stripe_customer_id, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
                "#,
            )
            .bind(import.user_id)
            .bind(&import.business_name)
            .bind(IMPORTED_PROFILE_DESCRIPTION)
            .bind(IMPORTED_PROFILE_CATEGORY)
            .bind(import.status)
            .bind(&import.stripe_subscription_id)
            .bind(start)
            .bind(end)
            .bind(&import.stripe_customer_id)
            .execute(&mut *tx)
            .await
            .map_err(write_failed(WriteStep::BusinessProfile))?;
        }

        sqlx::query(
            r#"
            UPDATE users
            SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                has_active_subscription = $3,
                account_type = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(import.user_id)
        .bind(&import.stripe_customer_id)
        .bind(import.flags.has_active_subscription)
        .bind(import.flags.account_type.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(write_failed(WriteStep::AccountFlags))?;

        tx.commit()
            .await
            .map_err(write_failed(WriteStep::AccountFlags))
    }
}
