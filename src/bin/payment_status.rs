//! Script to query the billing backend for the status of a payment.

use rust_membership_checkout::config::Config;
use rust_membership_checkout::integrations::submitter::PaymentSubmitter;

/// Main entry point for the status script.
///
/// Takes the external reference (e.g. `MEMBERSHIP_42_1718000000000`) as first
/// argument and prints the backend's payment result as JSON.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let reference = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: payment_status <external-reference>"))?;

    let config = Config::from_env()?;
    let submitter = PaymentSubmitter::from_config(&config)?;

    tracing::info!("Querying status of {}", reference);
    let result = submitter
        .get_status(&reference)
        .await
        .map_err(|e| anyhow::anyhow!("Error querying payment status: {}", e))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
