use crate::models::PaymentStatus;
use thiserror::Error;

/// Errors surfaced by a checkout attempt.
///
/// Every variant renders (through `Display`) the single human-readable message
/// shown to the user. Detection failures never appear here: they are absorbed
/// by the detector and replaced with the fallback payment method.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PaymentError {
    /// The tokenization provider (or local pre-checks) rejected a form field.
    #[error("Error in {field}: {message}")]
    Validation {
        /// Name of the offending form field (e.g. `cardNumber`).
        field: String,
        /// Provider supplied description of the problem.
        message: String,
    },
    /// The tokenization client is misconfigured or could not be loaded.
    #[error("Payment SDK configuration error. Please try again. ({message})")]
    Config {
        /// Diagnostic detail for logs.
        message: String,
    },
    /// Generic tokenization failure.
    #[error("{message}")]
    Tokenization {
        /// Provider message, or a generic fallback.
        message: String,
    },
    /// The backend did not answer within the submission timeout.
    #[error("Timeout: the payment is taking longer than expected")]
    Timeout,
    /// Any transport failure other than a timeout.
    #[error("Could not connect to the payment server")]
    Connection,
    /// The backend answered with a structured error message.
    #[error("{message}")]
    Server {
        /// Backend message, forwarded verbatim.
        message: String,
    },
    /// The backend processed the request and declined the payment.
    #[error("Payment {status}: {status_detail}")]
    RejectedPayment {
        /// Status exactly as reported by the backend.
        status: PaymentStatus,
        /// Backend status detail (e.g. `cc_rejected_insufficient_amount`).
        status_detail: String,
    },
    /// A submission is already in flight for this form.
    #[error("A payment is already being processed")]
    SubmissionInProgress,
}

impl PaymentError {
    /// Whether the backend accepted the request but declined the payment.
    ///
    /// Callers use this to pick a different recovery flow (e.g. "try another
    /// card") than for transport or validation failures.
    pub fn is_rejection(&self) -> bool {
        matches!(self, PaymentError::RejectedPayment { .. })
    }

    /// Message to present to the user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for PaymentError {
    /// Classifies a transport-level failure.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            tracing::error!("Backend request timed out: {}", err);
            PaymentError::Timeout
        } else {
            tracing::error!("Backend transport failure: {}", err);
            PaymentError::Connection
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_keeps_original_status() {
        let err = PaymentError::RejectedPayment {
            status: PaymentStatus::from("cancelled".to_string()),
            status_detail: "expired".to_string(),
        };

        assert!(err.is_rejection());
        assert_eq!(err.user_message(), "Payment cancelled: expired");
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = PaymentError::Validation {
            field: "securityCode".to_string(),
            message: "invalid length".to_string(),
        };

        assert!(!err.is_rejection());
        assert_eq!(err.to_string(), "Error in securityCode: invalid length");
    }

    #[test]
    fn test_server_message_forwarded_verbatim() {
        let err = PaymentError::Server {
            message: "Plan no disponible".to_string(),
        };
        assert_eq!(err.to_string(), "Plan no disponible");
    }
}
