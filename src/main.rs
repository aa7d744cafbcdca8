use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_membership_checkout::config::Config;
use rust_membership_checkout::core::models::{CardInput, CheckoutContext, PaymentResult};
use rust_membership_checkout::core::orchestrator::{PaymentOrchestrator, SuccessHandler};
use rust_membership_checkout::integrations::sdk_client::SdkHandle;

/// Checkout request read from disk: who buys which plan with which card.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutFile {
    #[serde(flatten)]
    checkout: CheckoutContext,
    card: CardInput,
}

/// Headless checkout runner.
///
/// Reads a checkout request (plan, user and card fields) from the JSON file
/// given as first argument, then drives the same flow as the payment form:
/// network detection while the number is "typed", tokenization, submission
/// and status mapping.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok when the payment was accepted (approved or
///   pending), an error with the user-facing message otherwise.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_membership_checkout=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: rust-membership-checkout <checkout.json>"))?;

    // Load configuration
    let config = Config::from_env()?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
    let request: CheckoutFile = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid checkout file {}: {}", path, e))?;

    tracing::info!(
        "Starting checkout of plan {} for user {}",
        request.checkout.plan.name,
        request.checkout.user_id
    );

    let sdk = Arc::new(SdkHandle::mercado_pago(&config));
    let on_success: SuccessHandler = Arc::new(|result: &PaymentResult| {
        tracing::info!("Payment accepted: {} ({})", result.status, result.status_detail);
    });
    let orchestrator = PaymentOrchestrator::new(&config, sdk, request.checkout, on_success)?;

    let update = orchestrator.on_card_number_change(&request.card.card_number);
    tracing::info!("Card number: {}", mask_formatted(&update.formatted));
    if let Some(detection) = update.detection {
        detection.await?;
    }
    tracing::info!("Payment method: {}", orchestrator.payment_method());

    match orchestrator.submit(&request.card).await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
            tracing::info!(
                "Checkout finished in {:?} (reference {})",
                outcome.state,
                outcome.reference
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Checkout ended in {:?}", orchestrator.state());
            Err(anyhow::anyhow!("Error: {}", e.user_message()))
        }
    }
}

/// Keep the grouping, hide everything but the last four digits.
fn mask_formatted(formatted: &str) -> String {
    let total = formatted.chars().filter(|c| c.is_ascii_digit()).count();
    let mut seen = 0;
    formatted
        .chars()
        .map(|c| {
            if c.is_ascii_digit() {
                seen += 1;
                if seen <= total.saturating_sub(4) {
                    return '•';
                }
            }
            c
        })
        .collect()
}
