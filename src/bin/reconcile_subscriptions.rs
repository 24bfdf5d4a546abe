//! One-shot reconciliation of local subscription status against Stripe.
//!
//! Reads `DATABASE_URL` and `STRIPE_SECRET_KEY`, walks every subscription
//! that has a business profile and a user, and corrects profile status and
//! account flags wherever they disagree with Stripe. Exits non-zero when the
//! configuration or the database is unusable. Per-record failures are logged
//! and counted but do not fail the run.

use dotenvy::dotenv;

use sanluisway_billing::infra::{
    config::{LogFormat, SyncConfig},
    setup::{init_sync_use_cases, init_tracing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing(LogFormat::from_env());

    let config = SyncConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    let use_cases = init_sync_use_cases(&config).await.inspect_err(|e| {
        tracing::error!(error = %e, "Startup failed");
    })?;

    let summary = use_cases.run_batch().await?;

    println!("Subscription reconciliation complete");
    println!("  total:          {}", summary.total);
    println!("  updated:        {}", summary.updated);
    println!("  alreadyCorrect: {}", summary.already_correct);
    println!("  skipped:        {}", summary.skipped);
    println!("  errors:         {}", summary.errors);

    Ok(())
}
