use serde::Deserialize;
use std::time::Duration;

/// Default backend used during local development.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:9090/billing";
pub const DEFAULT_MERCADOPAGO_API_URL: &str = "https://api.mercadopago.com";
pub const DEFAULT_LOCALE: &str = "es-PE";
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MERCHANT_NAME: &str = "FitDesk";

/// What to do with a payment the backend reports as `in_process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InProcessPolicy {
    /// Treat like `pending`: accepted, awaiting confirmation.
    #[default]
    AwaitConfirmation,
    /// Treat like any other non-approved status.
    Reject,
}

impl std::str::FromStr for InProcessPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "await_confirmation" | "pending" => Ok(InProcessPolicy::AwaitConfirmation),
            "reject" | "rejected" => Ok(InProcessPolicy::Reject),
            other => anyhow::bail!(
                "IN_PROCESS_POLICY must be 'await_confirmation' or 'reject', got '{}'",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mercadopago_public_key: String,
    pub mercadopago_api_url: String,
    pub mercadopago_locale: String,
    pub backend_url: String,
    pub submit_timeout_secs: u64,
    pub merchant_name: String,
    pub in_process_policy: InProcessPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            mercadopago_public_key: std::env::var("MERCADOPAGO_PUBLIC_KEY")
                .or_else(|_| std::env::var("VITE_MERCADOPAGO_PUBLIC_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!(
                        "MERCADOPAGO_PUBLIC_KEY or VITE_MERCADOPAGO_PUBLIC_KEY environment variable required"
                    )
                })
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("MERCADOPAGO_PUBLIC_KEY cannot be empty");
                    }
                    Ok(key.trim().to_string())
                })?,
            mercadopago_api_url: std::env::var("MERCADOPAGO_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| validate_http_url("MERCADOPAGO_API_URL", url))
                .transpose()?
                .unwrap_or_else(|| DEFAULT_MERCADOPAGO_API_URL.to_string()),
            mercadopago_locale: std::env::var("MERCADOPAGO_LOCALE")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
            backend_url: std::env::var("BACKEND_URL")
                .or_else(|_| std::env::var("VITE_BACKEND_URL"))
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| validate_http_url("BACKEND_URL", url))
                .transpose()?
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            submit_timeout_secs: std::env::var("SUBMIT_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_SUBMIT_TIMEOUT_SECS.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SUBMIT_TIMEOUT_SECS must be a positive number"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("SUBMIT_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
            merchant_name: std::env::var("MERCHANT_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MERCHANT_NAME.to_string()),
            in_process_policy: std::env::var("IN_PROCESS_POLICY")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<InProcessPolicy>())
                .transpose()?
                .unwrap_or_default(),
        };

        // Log successful configuration load (without the public key)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Backend URL: {}", config.backend_url);
        tracing::debug!("Mercado Pago API URL: {}", config.mercadopago_api_url);
        tracing::debug!(
            "Public key: {}...",
            config.mercadopago_public_key.chars().take(8).collect::<String>()
        );
        tracing::debug!("Submit timeout: {}s", config.submit_timeout_secs);
        tracing::debug!("In-process policy: {:?}", config.in_process_policy);

        Ok(config)
    }

    /// Config pointing at the given backend, with every other value defaulted.
    pub fn with_backend(public_key: impl Into<String>, backend_url: impl Into<String>) -> Self {
        Self {
            mercadopago_public_key: public_key.into(),
            mercadopago_api_url: DEFAULT_MERCADOPAGO_API_URL.to_string(),
            mercadopago_locale: DEFAULT_LOCALE.to_string(),
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            submit_timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
            merchant_name: DEFAULT_MERCHANT_NAME.to_string(),
            in_process_policy: InProcessPolicy::default(),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

fn validate_http_url(name: &str, url: String) -> anyhow::Result<String> {
    let url = url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}
