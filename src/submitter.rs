use serde::Deserialize;
use std::time::Duration;

use crate::config::Config;
use crate::errors::PaymentError;
use crate::models::{PaymentRequest, PaymentResult};

/// Error body the backend sends alongside non-2xx answers.
#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    message: Option<String>,
}

/// Client for the billing backend.
///
/// Only two endpoints are used: payment processing and status lookup.
#[derive(Clone)]
pub struct PaymentSubmitter {
    client: reqwest::Client,
    base_url: String,
    submit_timeout: Duration,
}

impl PaymentSubmitter {
    /// Creates a new `PaymentSubmitter`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The backend base URL (e.g. `http://localhost:9090/billing`).
    /// * `submit_timeout` - Upper bound for `POST /payments/process`.
    pub fn new(base_url: impl Into<String>, submit_timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PaymentError::Config {
                message: format!("Failed to create backend client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            submit_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PaymentError> {
        Self::new(config.backend_url.clone(), config.submit_timeout())
    }

    /// Sends a tokenized payment to the backend.
    ///
    /// # Arguments
    ///
    /// * `request` - The payment request; its reference is also sent as the
    ///   `X-Idempotency-Key` header.
    ///
    /// # Returns
    ///
    /// * `Result<PaymentResult, PaymentError>` - The backend verdict, or a
    ///   `Timeout`, `Server` or `Connection` error.
    pub async fn submit(&self, request: &PaymentRequest) -> Result<PaymentResult, PaymentError> {
        let url = format!("{}/payments/process", self.base_url);
        tracing::info!(
            "💳 Submitting payment {} to backend: {}",
            request.external_reference,
            url
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Idempotency-Key", request.external_reference.as_str())
            .timeout(self.submit_timeout)
            .json(request)
            .send()
            .await?;

        let result = Self::read_result(response).await?;
        tracing::info!(
            "✅ Payment {} processed: {} ({})",
            request.external_reference,
            result.status,
            result.status_detail
        );
        Ok(result)
    }

    /// Fetches the status of a previously submitted payment.
    ///
    /// # Arguments
    ///
    /// * `reference` - The external reference used on submission.
    pub async fn get_status(&self, reference: &str) -> Result<PaymentResult, PaymentError> {
        let url = format!("{}/payments/status/{}", self.base_url, reference);
        tracing::info!("Fetching payment status for {}", reference);

        let response = self.client.get(&url).send().await?;
        Self::read_result(response).await
    }

    async fn read_result(response: reqwest::Response) -> Result<PaymentResult, PaymentError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;

            let message = serde_json::from_str::<BackendErrorBody>(&error_text)
                .ok()
                .and_then(|body| body.message)
                .filter(|m| !m.trim().is_empty());

            return match message {
                Some(message) => {
                    tracing::error!("Backend returned {}: {}", status, message);
                    Err(PaymentError::Server { message })
                }
                None => {
                    tracing::error!("Backend returned {} without message: {}", status, error_text);
                    Err(PaymentError::Connection)
                }
            };
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse backend payment result: {}", e);
            PaymentError::Connection
        })
    }
}
