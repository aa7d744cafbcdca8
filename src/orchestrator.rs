/// Checkout orchestration
///
/// Sequences one payment attempt:
/// 1. Tokenize the card with the provider
/// 2. Build a fresh external reference
/// 3. Build the backend request with the latest detected payment method
/// 4. Submit to the backend
/// 5. Map the backend status onto the submission state machine
///
/// Network detection runs beside this flow as spawned tasks and never blocks it.
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, InProcessPolicy};
use crate::detector::{DetectionTracker, PaymentMethodDetector};
use crate::errors::PaymentError;
use crate::guard::ScopedFlag;
use crate::models::{
    CardInput, CheckoutContext, PaymentMethod, PaymentReference, PaymentRequest, PaymentResult,
    PaymentStatus, ReferenceGenerator,
};
use crate::sdk_client::SdkHandle;
use crate::submitter::PaymentSubmitter;
use crate::tokenizer::CardTokenizer;
use crate::validation::{extract_bin, format_card_number, strip_non_digits};

/// Callback invoked with the backend result when a payment is accepted.
///
/// Runs before the attempt settles: inside the callback `state()` still
/// reads `Submitting` and `is_processing()` is still `true`, and a nested
/// `submit` is refused with `SubmissionInProgress`.
pub type SuccessHandler = Arc<dyn Fn(&PaymentResult) + Send + Sync>;

/// Submission state machine: `Idle → Submitting → {Approved, Pending, Rejected, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionState {
    #[default]
    Idle,
    Submitting,
    Approved,
    Pending,
    Rejected,
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Approved
                | SubmissionState::Pending
                | SubmissionState::Rejected
                | SubmissionState::Failed
        )
    }
}

/// An accepted payment (approved, or awaiting confirmation).
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionOutcome {
    pub state: SubmissionState,
    pub reference: PaymentReference,
    pub result: PaymentResult,
}

/// Result of a card number edit.
#[derive(Debug)]
pub struct CardNumberUpdate {
    /// Value to display in the input (`4009 1753 3280 6176`).
    pub formatted: String,
    /// Digits to keep in the form state: every digit of the raw input, not
    /// capped at sixteen like `formatted`. Length is checked on tokenization.
    pub digits: String,
    /// Present when the edit changed the BIN and a detection was launched.
    /// Resolves to whether the result was applied (`false` if superseded).
    pub detection: Option<JoinHandle<bool>>,
}

/// Holds the single-flight flag for one submission.
///
/// Dropping it releases the flag; if the attempt never reached a terminal
/// state (its future was dropped, or it panicked) the state becomes `Failed`.
struct SubmissionGuard<'a> {
    _flag: ScopedFlag<'a>,
    state: &'a watch::Sender<SubmissionState>,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if *state == SubmissionState::Submitting {
                *state = SubmissionState::Failed;
                return true;
            }
            false
        });
    }
}

/// Form-level controller for a membership checkout.
pub struct PaymentOrchestrator {
    tokenizer: CardTokenizer,
    detector: PaymentMethodDetector,
    submitter: PaymentSubmitter,
    checkout: CheckoutContext,
    merchant_name: String,
    in_process_policy: InProcessPolicy,
    references: ReferenceGenerator,
    processing: AtomicBool,
    state: watch::Sender<SubmissionState>,
    detection: Arc<DetectionTracker>,
    on_success: SuccessHandler,
}

impl PaymentOrchestrator {
    /// Builds an orchestrator sharing `sdk` between tokenization and detection.
    pub fn new(
        config: &Config,
        sdk: Arc<SdkHandle>,
        checkout: CheckoutContext,
        on_success: SuccessHandler,
    ) -> Result<Self, PaymentError> {
        let submitter = PaymentSubmitter::from_config(config)?;

        Ok(Self::from_parts(
            CardTokenizer::new(sdk.clone()),
            PaymentMethodDetector::new(sdk),
            submitter,
            checkout,
            config,
            on_success,
        ))
    }

    pub fn from_parts(
        tokenizer: CardTokenizer,
        detector: PaymentMethodDetector,
        submitter: PaymentSubmitter,
        checkout: CheckoutContext,
        config: &Config,
        on_success: SuccessHandler,
    ) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);

        Self {
            tokenizer,
            detector,
            submitter,
            checkout,
            merchant_name: config.merchant_name.clone(),
            in_process_policy: config.in_process_policy,
            references: ReferenceGenerator::default(),
            processing: AtomicBool::new(false),
            state,
            detection: Arc::new(DetectionTracker::new()),
            on_success,
        }
    }

    pub fn state(&self) -> SubmissionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    /// Whether a submission is in flight (the submit button stays disabled).
    pub fn is_processing(&self) -> bool {
        self.processing.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Most recently applied payment method, `visa` until a detection lands.
    pub fn payment_method(&self) -> PaymentMethod {
        self.detection.current()
    }

    pub fn subscribe_payment_method(&self) -> watch::Receiver<PaymentMethod> {
        self.detection.subscribe()
    }

    pub fn detector(&self) -> &PaymentMethodDetector {
        &self.detector
    }

    /// Handles an edit of the card number field.
    ///
    /// Launches a background detection once six digits are present and the
    /// BIN differs from the previous one. Must be called inside a tokio runtime.
    pub fn on_card_number_change(&self, raw: &str) -> CardNumberUpdate {
        let formatted = format_card_number(raw);
        let digits = strip_non_digits(raw);

        let detection = match extract_bin(&digits) {
            Some(bin) if self.detection.should_detect(&bin) => Some(self.spawn_detection(bin)),
            Some(_) => None,
            None => {
                self.detection.reset_bin();
                None
            }
        };

        CardNumberUpdate {
            formatted,
            digits,
            detection,
        }
    }

    fn spawn_detection(&self, bin: String) -> JoinHandle<bool> {
        let ticket = self.detection.begin();
        let detector = self.detector.clone();
        let tracker = self.detection.clone();

        tokio::spawn(async move {
            let method = detector.detect(&bin).await;
            let applied = tracker.apply(ticket, method.clone());
            if applied {
                tracing::debug!("Payment method set to {} (detection #{})", method, ticket);
            } else {
                tracing::debug!(
                    "Discarding stale detection #{} ({}), latest is #{}",
                    ticket,
                    method,
                    tracker.latest()
                );
            }
            applied
        })
    }

    /// Runs one payment attempt for `card`.
    ///
    /// A call made while another submission is in flight is refused with
    /// `SubmissionInProgress` and sends nothing. Accepted payments (approved,
    /// pending, and in-process under the default policy) invoke the success
    /// handler and return `Ok`; declines return `RejectedPayment`.
    pub async fn submit(&self, card: &CardInput) -> Result<SubmissionOutcome, PaymentError> {
        let Some(flag) = ScopedFlag::acquire(&self.processing) else {
            tracing::warn!("Submit ignored: a payment is already being processed");
            return Err(PaymentError::SubmissionInProgress);
        };
        let _guard = SubmissionGuard {
            _flag: flag,
            state: &self.state,
        };
        self.state.send_replace(SubmissionState::Submitting);

        let outcome = self.run_submission(card).await;

        let next = match &outcome {
            Ok(accepted) => accepted.state,
            Err(e) if e.is_rejection() => SubmissionState::Rejected,
            Err(_) => SubmissionState::Failed,
        };
        self.state.send_replace(next);

        if let Err(e) = &outcome {
            tracing::error!("❌ Payment attempt ended in {:?}: {}", next, e);
        }

        outcome
    }

    async fn run_submission(&self, card: &CardInput) -> Result<SubmissionOutcome, PaymentError> {
        let token = self.tokenizer.create_token(card).await?;

        let reference = self.references.next(&self.checkout.user_id);
        let payment_method = self.detection.current();
        let request = PaymentRequest::build(
            reference.clone(),
            token,
            &card.normalized(),
            &payment_method,
            &self.checkout,
            &self.merchant_name,
        );

        let result = self.submitter.submit(&request).await?;

        let accepted = match (&result.status, self.in_process_policy) {
            (PaymentStatus::Approved, _) => Some(SubmissionState::Approved),
            (PaymentStatus::Pending, _) => Some(SubmissionState::Pending),
            (PaymentStatus::InProcess, InProcessPolicy::AwaitConfirmation) => {
                Some(SubmissionState::Pending)
            }
            _ => None,
        };
        let Some(state) = accepted else {
            return Err(PaymentError::RejectedPayment {
                status: result.status,
                status_detail: result.status_detail,
            });
        };

        if state == SubmissionState::Approved {
            tracing::info!(
                "🎉 Payment approved, membership {} activated",
                self.checkout.plan.name
            );
        } else {
            tracing::info!(
                "⏳ Payment {} accepted, awaiting confirmation ({})",
                reference,
                result.status
            );
        }
        (self.on_success)(&result);

        Ok(SubmissionOutcome {
            state,
            reference,
            result,
        })
    }

    /// Current backend status for a submitted reference.
    pub async fn payment_status(
        &self,
        reference: &PaymentReference,
    ) -> Result<PaymentResult, PaymentError> {
        self.submitter.get_status(reference.as_str()).await
    }
}
