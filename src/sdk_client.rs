use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::errors::PaymentError;
use crate::guard::ScopedFlag;
use crate::models::{CardInput, CardToken, PaymentMethodsResponse};

// ============ Provider Errors ============

/// Field-level problem reported by the tokenization provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCause {
    /// Form field name when the provider code is known, raw code otherwise.
    pub field: String,
    pub message: String,
}

/// Failure reported by a [`TokenizationClient`].
///
/// Kept deliberately loose: the tokenizer turns it into a [`PaymentError`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderError {
    pub message: String,
    pub causes: Vec<ProviderCause>,
    /// Credentials or client setup were rejected (bad public key, ...).
    pub setup: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            setup: true,
            ..Default::default()
        }
    }

    pub fn with_cause(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.causes.push(ProviderCause {
            field: field.into(),
            message: message.into(),
        });
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, " [{}: {}]", cause.field, cause.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}

/// Map Mercado Pago card token error codes to form field names.
pub fn field_for_cause_code(code: &str) -> Option<&'static str> {
    match code {
        "205" | "E301" => Some("cardNumber"),
        "208" | "325" => Some("expirationMonth"),
        "209" | "326" => Some("expirationYear"),
        "212" | "322" => Some("identificationType"),
        "213" | "214" | "324" => Some("identificationNumber"),
        "221" | "316" => Some("cardholderName"),
        "224" | "E302" => Some("securityCode"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    cause: Vec<ProviderErrorCause>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorCause {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    description: Option<String>,
}

impl ProviderErrorCause {
    fn into_cause(self) -> ProviderCause {
        let code = match self.code {
            Value::String(code) => code,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let field = field_for_cause_code(&code)
            .map(str::to_string)
            .unwrap_or(code);

        ProviderCause {
            field,
            message: self.description.unwrap_or_default(),
        }
    }
}

// ============ Client Seam ============

/// The external tokenization client.
///
/// Card data only ever travels through this trait, straight to the provider.
#[async_trait]
pub trait TokenizationClient: Send + Sync {
    /// Exchange normalized card fields for a single-use token.
    async fn create_card_token(&self, card: &CardInput) -> Result<CardToken, ProviderError>;

    /// Search the payment method catalogue, optionally filtered by BIN.
    async fn get_payment_methods(
        &self,
        bin: Option<&str>,
    ) -> Result<PaymentMethodsResponse, ProviderError>;
}

/// Produces a ready [`TokenizationClient`]. Run at most once per successful load.
#[async_trait]
pub trait SdkLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn TokenizationClient>, PaymentError>;
}

// ============ Mercado Pago ============

/// Mercado Pago public API client, authenticated with the public key only.
#[derive(Clone)]
pub struct MercadoPagoClient {
    client: reqwest::Client,
    api_url: String,
    public_key: String,
    locale: String,
}

impl MercadoPagoClient {
    /// Creates a new `MercadoPagoClient`.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Base URL of the provider API (no trailing slash).
    /// * `public_key` - Public key of the merchant account.
    /// * `locale` - Locale for catalogue texts (e.g. `es-PE`).
    pub fn new(
        api_url: impl Into<String>,
        public_key: impl Into<String>,
        locale: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Config {
                message: format!("Failed to create Mercado Pago client: {}", e),
            })?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            public_key: public_key.into(),
            locale: locale.into(),
        })
    }

    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let body: Option<ProviderErrorBody> = serde_json::from_str(&text).ok();
        let message = body
            .as_ref()
            .and_then(|b| b.message.clone())
            .unwrap_or_else(|| format!("Mercado Pago returned {}: {}", status, text));

        let mut error = if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            ProviderError::setup(message)
        } else {
            ProviderError::new(message)
        };

        if let Some(body) = body {
            error
                .causes
                .extend(body.cause.into_iter().map(ProviderErrorCause::into_cause));
        }

        error
    }
}

fn parse_expiration(field: &str, value: &str) -> Result<u32, ProviderError> {
    value.trim().parse().map_err(|_| {
        ProviderError::new("invalid card expiration").with_cause(field, "must be numeric")
    })
}

#[async_trait]
impl TokenizationClient for MercadoPagoClient {
    async fn create_card_token(&self, card: &CardInput) -> Result<CardToken, ProviderError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1/card_tokens", self.api_url),
            &[("public_key", self.public_key.as_str())],
        )
        .map_err(|e| ProviderError::setup(format!("Failed to build URL: {}", e)))?;

        let body = json!({
            "card_number": card.card_number,
            "expiration_month": parse_expiration("expirationMonth", &card.expiration_month)?,
            "expiration_year": parse_expiration("expirationYear", &card.expiration_year)?,
            "security_code": card.security_code,
            "cardholder": {
                "name": card.cardholder_name,
                "identification": {
                    "type": card.identification_type.as_str(),
                    "number": card.identification_number,
                }
            }
        });

        tracing::debug!("Requesting card token from Mercado Pago");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("Card token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<CardToken>()
            .await
            .map_err(|e| ProviderError::new(format!("Failed to parse card token response: {}", e)))
    }

    async fn get_payment_methods(
        &self,
        bin: Option<&str>,
    ) -> Result<PaymentMethodsResponse, ProviderError> {
        let mut params = vec![
            ("public_key", self.public_key.as_str()),
            ("locale", self.locale.as_str()),
            ("marketplace", "NONE"),
        ];
        if let Some(bin) = bin {
            params.push(("bins", bin));
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1/payment_methods/search", self.api_url),
            &params,
        )
        .map_err(|e| ProviderError::setup(format!("Failed to build URL: {}", e)))?;

        let response =
            self.client.get(url).send().await.map_err(|e| {
                ProviderError::new(format!("Payment methods request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response.json::<PaymentMethodsResponse>().await.map_err(|e| {
            ProviderError::new(format!("Failed to parse payment methods response: {}", e))
        })
    }
}

/// Loads a [`MercadoPagoClient`] from configuration.
#[derive(Debug, Clone)]
pub struct MercadoPagoLoader {
    api_url: String,
    public_key: String,
    locale: String,
}

impl MercadoPagoLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            api_url: config.mercadopago_api_url.clone(),
            public_key: config.mercadopago_public_key.clone(),
            locale: config.mercadopago_locale.clone(),
        }
    }
}

#[async_trait]
impl SdkLoader for MercadoPagoLoader {
    async fn load(&self) -> Result<Arc<dyn TokenizationClient>, PaymentError> {
        if self.public_key.trim().is_empty() {
            return Err(PaymentError::Config {
                message: "Mercado Pago public key is not configured".to_string(),
            });
        }

        tracing::info!("Loading Mercado Pago client ({})", self.locale);
        let client = MercadoPagoClient::new(&self.api_url, &self.public_key, &self.locale)?;
        Ok(Arc::new(client))
    }
}

// ============ Shared Handle ============

/// Lifecycle of the shared client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Owned, lazily initialized handle to the tokenization client.
///
/// Share it behind an `Arc` between the tokenizer and the detector. Concurrent
/// `initialize` calls during a load wait on the same in-flight attempt; a
/// failed load leaves the handle uninitialized so a later call can retry.
pub struct SdkHandle {
    loader: Box<dyn SdkLoader>,
    client: OnceCell<Arc<dyn TokenizationClient>>,
    loading: AtomicBool,
}

impl SdkHandle {
    pub fn new(loader: impl SdkLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            client: OnceCell::new(),
            loading: AtomicBool::new(false),
        }
    }

    /// Handle for the configured Mercado Pago account.
    pub fn mercado_pago(config: &Config) -> Self {
        Self::new(MercadoPagoLoader::new(config))
    }

    /// Handle that is already `Ready` with the given client.
    pub fn ready(client: Arc<dyn TokenizationClient>) -> Self {
        Self {
            loader: Box::new(AlreadyLoaded(client.clone())),
            client: OnceCell::new_with(Some(client)),
            loading: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SdkState {
        if self.client.initialized() {
            SdkState::Ready
        } else if self.loading.load(Ordering::Acquire) {
            SdkState::Initializing
        } else {
            SdkState::Uninitialized
        }
    }

    /// Returns the client, loading it first if needed.
    pub async fn initialize(&self) -> Result<Arc<dyn TokenizationClient>, PaymentError> {
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }

        let client = self
            .client
            .get_or_try_init(|| async {
                let _loading = ScopedFlag::acquire(&self.loading);
                let result = self.loader.load().await;
                match &result {
                    Ok(_) => tracing::info!("✓ Tokenization client ready"),
                    Err(e) => tracing::error!("Failed to load tokenization client: {}", e),
                }
                result
            })
            .await?;

        Ok(client.clone())
    }
}

struct AlreadyLoaded(Arc<dyn TokenizationClient>);

#[async_trait]
impl SdkLoader for AlreadyLoaded {
    async fn load(&self) -> Result<Arc<dyn TokenizationClient>, PaymentError> {
        Ok(self.0.clone())
    }
}
