use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::validation::{pad_month, split_cardholder_name, strip_non_digits};

// ============ Card Input ============

/// Identity document type accepted by the provider in Peru.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentificationType {
    /// Documento Nacional de Identidad.
    #[default]
    #[serde(rename = "DNI")]
    Dni,
    /// Registro Único de Contribuyentes.
    #[serde(rename = "RUC")]
    Ruc,
}

impl IdentificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentificationType::Dni => "DNI",
            IdentificationType::Ruc => "RUC",
        }
    }
}

impl fmt::Display for IdentificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_installments() -> u32 {
    1
}

/// Raw card form fields, held only until a submission consumes them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInput {
    /// Card number; may still contain display spaces.
    pub card_number: String,
    /// Name as printed on the card.
    pub cardholder_name: String,
    /// Two digit month ("01".."12"); single digits are padded on normalization.
    pub expiration_month: String,
    /// Four digit year.
    pub expiration_year: String,
    pub security_code: String,
    #[serde(default)]
    pub identification_type: IdentificationType,
    pub identification_number: String,
    /// Number of installments requested.
    #[serde(default = "default_installments")]
    pub installments: u32,
}

impl CardInput {
    /// Returns a copy with the card number reduced to digits, the month padded
    /// to two characters and free text trimmed.
    pub fn normalized(&self) -> CardInput {
        CardInput {
            card_number: strip_non_digits(&self.card_number),
            cardholder_name: self.cardholder_name.trim().to_string(),
            expiration_month: pad_month(&self.expiration_month),
            expiration_year: self.expiration_year.trim().to_string(),
            security_code: self.security_code.trim().to_string(),
            identification_type: self.identification_type,
            identification_number: self.identification_number.trim().to_string(),
            installments: self.installments,
        }
    }

    /// Payer first and last name derived from the cardholder name.
    pub fn payer_names(&self) -> (String, String) {
        split_cardholder_name(&self.cardholder_name)
    }
}

// Card data must never reach the logs.
impl fmt::Debug for CardInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = strip_non_digits(&self.card_number);
        let last_four = &digits[digits.len().saturating_sub(4)..];
        f.debug_struct("CardInput")
            .field("card_number", &format!("**** {}", last_four))
            .field("cardholder_name", &self.cardholder_name)
            .field("expiration_month", &self.expiration_month)
            .field("expiration_year", &self.expiration_year)
            .field("security_code", &"***")
            .field("identification_type", &self.identification_type)
            .field("identification_number", &self.identification_number)
            .field("installments", &self.installments)
            .finish()
    }
}

// ============ Tokenization Provider Models ============

/// Single-use card token issued by the tokenization provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardToken {
    /// Opaque token id sent to the backend.
    pub id: String,
    #[serde(default)]
    pub first_six_digits: String,
    #[serde(default)]
    pub last_four_digits: String,
    #[serde(default)]
    pub expiration_month: u32,
    #[serde(default)]
    pub expiration_year: u32,
}

/// Payment network identifier (e.g. `visa`, `master`, `amex`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    /// Method used whenever detection is inconclusive.
    pub const FALLBACK: &'static str = "visa";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn fallback() -> Self {
        Self(Self::FALLBACK.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PaymentMethod {
    fn default() -> Self {
        Self::fallback()
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalogue entry returned by the provider's payment method search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub payment_type_id: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Remaining provider fields (settings, issuer, ...), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response envelope of the payment method search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMethodsResponse {
    #[serde(default)]
    pub results: Vec<PaymentMethodInfo>,
}

// ============ Checkout Models ============

/// Membership plan being purchased; supplies amount and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipPlan {
    pub id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
}

/// Who is buying what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutContext {
    pub plan: MembershipPlan,
    pub user_id: String,
    pub user_email: String,
}

/// External reference attached to a payment; doubles as the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PaymentReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Issues `{prefix}_{user}_{millis}` references.
///
/// The timestamp component strictly increases across calls on the same
/// generator, so two attempts within one millisecond still get distinct keys.
#[derive(Debug)]
pub struct ReferenceGenerator {
    prefix: String,
    last_stamp: AtomicI64,
}

impl ReferenceGenerator {
    pub const DEFAULT_PREFIX: &'static str = "MEMBERSHIP";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn next(&self, user_id: &str) -> PaymentReference {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let stamp = now.max(previous + 1);

        PaymentReference(format!("{}_{}_{}", self.prefix, user_id, stamp))
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

/// Body of `POST /payments/process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub external_reference: PaymentReference,
    /// Sent as a JSON number, never as a decimal string.
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub payer_email: String,
    pub payer_first_name: String,
    pub payer_last_name: String,
    pub description: String,
    /// Card token id.
    pub token: String,
    pub installments: u32,
    pub payment_method_id: PaymentMethod,
    pub identification_type: IdentificationType,
    pub identification_number: String,
}

impl PaymentRequest {
    /// Builds the backend request. Takes the token by value: a request cannot
    /// exist without one, and a token is consumed by exactly one request.
    pub fn build(
        external_reference: PaymentReference,
        token: CardToken,
        card: &CardInput,
        payment_method: &PaymentMethod,
        checkout: &CheckoutContext,
        merchant_name: &str,
    ) -> Self {
        let (payer_first_name, payer_last_name) = card.payer_names();

        Self {
            external_reference,
            amount: checkout.plan.price,
            payer_email: checkout.user_email.clone(),
            payer_first_name,
            payer_last_name,
            description: format!("Membresía {} - {}", checkout.plan.name, merchant_name),
            token: token.id,
            installments: card.installments,
            payment_method_id: payment_method.clone(),
            identification_type: card.identification_type,
            identification_number: card.identification_number.trim().to_string(),
        }
    }
}

// ============ Backend Result Models ============

/// Payment status reported by the backend.
///
/// Unknown values are kept in `Other` so the original text survives into
/// rejection errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Approved,
    Pending,
    InProcess,
    Rejected,
    Other(String),
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Approved => "approved",
            PaymentStatus::Pending => "pending",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "approved" => PaymentStatus::Approved,
            "pending" => PaymentStatus::Pending,
            "in_process" => PaymentStatus::InProcess,
            "rejected" => PaymentStatus::Rejected,
            _ => PaymentStatus::Other(value),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(value: PaymentStatus) -> Self {
        value.as_str().to_string()
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Other(String::new())
    }
}

fn status_or_unknown<'de, D>(deserializer: D) -> Result<PaymentStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(PaymentStatus::from).unwrap_or_default())
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend answer for a processed (or queried) payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    /// Missing or `null` on a processed payment reads as an empty `Other`
    /// status, which the orchestrator treats as a decline.
    #[serde(default, deserialize_with = "status_or_unknown")]
    pub status: PaymentStatus,
    #[serde(default)]
    pub status_detail: String,
    /// Pass-through fields (payment id, amounts, dates...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_card() -> CardInput {
        CardInput {
            card_number: "4009 1753 3280 6176".to_string(),
            cardholder_name: "Juan Carlos Perez".to_string(),
            expiration_month: "1".to_string(),
            expiration_year: "2030".to_string(),
            security_code: "123".to_string(),
            identification_type: IdentificationType::Dni,
            identification_number: "12345678".to_string(),
            installments: 1,
        }
    }

    fn sample_checkout() -> CheckoutContext {
        CheckoutContext {
            plan: MembershipPlan {
                id: "gold".to_string(),
                name: "Gold".to_string(),
                price: dec!(50),
                description: "Acceso total".to_string(),
            },
            user_id: "42".to_string(),
            user_email: "juan@example.com".to_string(),
        }
    }

    #[test]
    fn test_normalized_card_input() {
        let card = sample_card().normalized();
        assert_eq!(card.card_number, "4009175332806176");
        assert_eq!(card.expiration_month, "01");
    }

    #[test]
    fn test_debug_masks_card_data() {
        let debug = format!("{:?}", sample_card());
        assert!(debug.contains("**** 6176"));
        assert!(!debug.contains("4009"));
        assert!(!debug.contains("\"123\""));
    }

    #[test]
    fn test_status_parsing() {
        let result: PaymentResult = serde_json::from_value(json!({
            "status": "approved",
            "statusDetail": "accredited",
            "paymentId": 123
        }))
        .unwrap();
        assert_eq!(result.status, PaymentStatus::Approved);
        assert_eq!(result.status_detail, "accredited");
        assert_eq!(result.extra.get("paymentId"), Some(&json!(123)));

        let missing: PaymentResult = serde_json::from_value(json!({
            "statusDetail": "cc_rejected_other_reason"
        }))
        .unwrap();
        assert_eq!(missing.status, PaymentStatus::Other(String::new()));

        let null: PaymentResult =
            serde_json::from_value(json!({"status": null, "paymentId": 1})).unwrap();
        assert_eq!(null.status, PaymentStatus::default());
        assert_eq!(null.extra.get("paymentId"), Some(&json!(1)));

        let unknown = PaymentStatus::from("charged_back".to_string());
        assert_eq!(unknown, PaymentStatus::Other("charged_back".to_string()));
        assert_eq!(unknown.to_string(), "charged_back");
    }

    #[test]
    fn test_payment_request_build() {
        let token = CardToken {
            id: "tok_123".to_string(),
            first_six_digits: "400917".to_string(),
            last_four_digits: "6176".to_string(),
            expiration_month: 1,
            expiration_year: 2030,
        };
        let reference = PaymentReference::from("MEMBERSHIP_42_1".to_string());
        let request = PaymentRequest::build(
            reference,
            token,
            &sample_card(),
            &PaymentMethod::new("visa"),
            &sample_checkout(),
            "FitDesk",
        );

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["externalReference"], "MEMBERSHIP_42_1");
        assert_eq!(body["token"], "tok_123");
        assert_eq!(body["payerFirstName"], "Juan");
        assert_eq!(body["payerLastName"], "Carlos Perez");
        assert_eq!(body["description"], "Membresía Gold - FitDesk");
        assert_eq!(body["paymentMethodId"], "visa");
        assert_eq!(body["identificationType"], "DNI");
        assert_eq!(body["amount"], json!(50.0));
        assert!(body["amount"].is_number());
    }

    #[test]
    fn test_plan_price_is_numeric() {
        let plan: MembershipPlan = serde_json::from_value(json!({
            "id": "gold",
            "name": "Gold",
            "price": 49.5
        }))
        .unwrap();
        assert_eq!(plan.price, dec!(49.5));
        assert_eq!(serde_json::to_value(&plan).unwrap()["price"], json!(49.5));
    }

    #[test]
    fn test_references_are_unique_and_prefixed() {
        let generator = ReferenceGenerator::default();
        let first = generator.next("42");
        let second = generator.next("42");

        assert_ne!(first, second);
        assert!(first.as_str().starts_with("MEMBERSHIP_42_"));
    }
}
