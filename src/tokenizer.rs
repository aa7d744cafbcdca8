use std::sync::Arc;

use crate::errors::PaymentError;
use crate::models::{CardInput, CardToken};
use crate::sdk_client::{ProviderError, SdkHandle};
use crate::validation::validate_card_number;

const GENERIC_TOKENIZATION_MESSAGE: &str = "Error processing the card";

/// Turns raw card fields into a single-use token.
#[derive(Clone)]
pub struct CardTokenizer {
    sdk: Arc<SdkHandle>,
}

impl CardTokenizer {
    pub fn new(sdk: Arc<SdkHandle>) -> Self {
        Self { sdk }
    }

    /// Creates a card token for `card`.
    ///
    /// The input is normalized first (digits-only number, padded month) and a
    /// card number of impossible length is rejected without calling the
    /// provider. No retries: the user corrects the form and submits again.
    pub async fn create_token(&self, card: &CardInput) -> Result<CardToken, PaymentError> {
        let card = card.normalized();
        validate_card_number(&card.card_number)?;

        let client = self.sdk.initialize().await?;

        tracing::info!("🔒 Creating card token");
        match client.create_card_token(&card).await {
            Ok(token) => {
                tracing::info!(
                    "✅ Card token created: {} (****{})",
                    token.id,
                    token.last_four_digits
                );
                Ok(token)
            }
            Err(e) => {
                tracing::error!("❌ Card tokenization failed: {}", e);
                Err(classify_provider_error(e))
            }
        }
    }
}

/// Map a provider failure onto the checkout error taxonomy.
pub fn classify_provider_error(error: ProviderError) -> PaymentError {
    if error.setup || error.message.contains("primary field") {
        return PaymentError::Config {
            message: error.message,
        };
    }

    if let Some(cause) = error.causes.into_iter().next() {
        return PaymentError::Validation {
            field: cause.field,
            message: cause.message,
        };
    }

    let message = if error.message.trim().is_empty() {
        GENERIC_TOKENIZATION_MESSAGE.to_string()
    } else {
        error.message
    };
    PaymentError::Tokenization { message }
}
