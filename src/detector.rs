use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::errors::PaymentError;
use crate::models::{PaymentMethod, PaymentMethodInfo};
use crate::sdk_client::SdkHandle;
use crate::tokenizer::classify_provider_error;
use crate::validation::is_valid_bin;

/// Detects the card network from the BIN.
///
/// Detection is advisory: every failure collapses into the fallback method and
/// a `warn!` log line, never into an error for the user.
#[derive(Clone)]
pub struct PaymentMethodDetector {
    sdk: Arc<SdkHandle>,
    /// BIN -> detected method (1 hour TTL). Only real hits are cached.
    cache: Cache<String, PaymentMethod>,
}

impl PaymentMethodDetector {
    pub fn new(sdk: Arc<SdkHandle>) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(3600))
            .max_capacity(10_000)
            .build();

        Self { sdk, cache }
    }

    /// Payment method for a 6-digit BIN, or `visa` when inconclusive.
    pub async fn detect(&self, bin: &str) -> PaymentMethod {
        if !is_valid_bin(bin) {
            tracing::warn!("Skipping detection for malformed BIN ({} chars)", bin.len());
            return PaymentMethod::fallback();
        }

        if let Some(cached) = self.cache.get(bin).await {
            tracing::debug!("🔍 Payment method for BIN {} served from cache: {}", bin, cached);
            return cached;
        }

        match self.lookup(bin).await {
            Ok(Some(method)) => {
                tracing::info!("🔍 Payment method detected for BIN {}: {}", bin, method);
                self.cache.insert(bin.to_string(), method.clone()).await;
                method
            }
            Ok(None) => {
                tracing::warn!("No payment method found for BIN {}, using fallback", bin);
                PaymentMethod::fallback()
            }
            Err(e) => {
                tracing::warn!("Error detecting payment method for BIN {}: {}", bin, e);
                PaymentMethod::fallback()
            }
        }
    }

    async fn lookup(&self, bin: &str) -> Result<Option<PaymentMethod>, PaymentError> {
        let client = self.sdk.initialize().await?;
        let response = client
            .get_payment_methods(Some(bin))
            .await
            .map_err(classify_provider_error)?;

        Ok(response
            .results
            .into_iter()
            .next()
            .filter(|info| !info.id.trim().is_empty())
            .map(|info| PaymentMethod::new(info.id)))
    }

    /// Whole payment method catalogue; empty on any failure.
    pub async fn available_methods(&self) -> Vec<PaymentMethodInfo> {
        self.catalogue(None).await
    }

    /// Catalogue entries matching `bin`; empty on any failure.
    pub async fn card_info(&self, bin: &str) -> Vec<PaymentMethodInfo> {
        self.catalogue(Some(bin)).await
    }

    async fn catalogue(&self, bin: Option<&str>) -> Vec<PaymentMethodInfo> {
        let client = match self.sdk.initialize().await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Error loading payment methods: {}", e);
                return Vec::new();
            }
        };

        match client.get_payment_methods(bin).await {
            Ok(response) => response.results,
            Err(e) => {
                tracing::error!("Error loading payment methods: {}", e);
                Vec::new()
            }
        }
    }
}

/// Keeps only the newest detection result.
///
/// Each launched detection takes a ticket from a monotonically increasing
/// counter; a finished detection may update the current method only while its
/// ticket is still the latest issued.
#[derive(Debug)]
pub struct DetectionTracker {
    latest: AtomicU64,
    last_bin: watch::Sender<Option<String>>,
    method: watch::Sender<PaymentMethod>,
}

impl DetectionTracker {
    pub fn new() -> Self {
        let (last_bin, _) = watch::channel(None);
        let (method, _) = watch::channel(PaymentMethod::fallback());
        Self {
            latest: AtomicU64::new(0),
            last_bin,
            method,
        }
    }

    /// Records `bin` and reports whether it differs from the previous prefix.
    pub fn should_detect(&self, bin: &str) -> bool {
        self.last_bin.send_if_modified(|last| {
            if last.as_deref() == Some(bin) {
                return false;
            }
            *last = Some(bin.to_string());
            true
        })
    }

    /// Forget the last prefix (the number dropped below six digits).
    pub fn reset_bin(&self) {
        self.last_bin.send_if_modified(|last| last.take().is_some());
    }

    /// Issue the ticket for a detection about to start.
    pub fn begin(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Apply a finished detection. Returns `false` for a stale ticket.
    pub fn apply(&self, ticket: u64, method: PaymentMethod) -> bool {
        let mut applied = false;
        self.method.send_if_modified(|current| {
            if ticket != self.latest.load(Ordering::SeqCst) {
                return false;
            }
            applied = true;
            if *current == method {
                return false;
            }
            *current = method;
            true
        });
        applied
    }

    pub fn current(&self) -> PaymentMethod {
        self.method.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentMethod> {
        self.method.subscribe()
    }
}

impl Default for DetectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_ticket_is_discarded() {
        let tracker = DetectionTracker::new();
        let older = tracker.begin();
        let newer = tracker.begin();

        assert!(tracker.apply(newer, PaymentMethod::new("master")));
        assert!(!tracker.apply(older, PaymentMethod::new("amex")));
        assert_eq!(tracker.current(), PaymentMethod::new("master"));
    }

    #[test]
    fn test_should_detect_only_on_prefix_change() {
        let tracker = DetectionTracker::new();
        assert!(tracker.should_detect("400917"));
        assert!(!tracker.should_detect("400917"));
        assert!(tracker.should_detect("510510"));

        tracker.reset_bin();
        assert!(tracker.should_detect("510510"));
    }

    #[test]
    fn test_defaults_to_fallback() {
        let tracker = DetectionTracker::default();
        assert_eq!(tracker.current().as_str(), "visa");
        assert_eq!(tracker.latest(), 0);
    }
}
