use crate::domain::{PaymentStatus, TaxId};
use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    MercadoPago,
    Stub,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::MercadoPago => "mercado_pago",
            ProviderName::Stub => "stub",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mercado_pago" | "mercadopago" => Ok(ProviderName::MercadoPago),
            "stub" => Ok(ProviderName::Stub),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Request to open a charge (checkout preference) at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub amount: BigDecimal,
    pub description: String,
    /// Sent as the provider-side dedup header and as the external reference.
    pub idempotency_key: String,
    /// Payer identification; the all-zero sentinel is sent when absent.
    pub tax_id: Option<TaxId>,
}

impl ChargeRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount < BigDecimal::from_str("0.01").unwrap_or_default() {
            return Err(PaymentError::ValidationError {
                message: "amount must be at least 0.01".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "idempotency key is required".to_string(),
                field: Some("idempotency_key".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub provider_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<JsonValue>,
}

/// Latest provider-side view of a charge, looked up by external reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLookup {
    pub status: PaymentStatus,
    pub provider_status: String,
    pub provider_payment_id: Option<String>,
}

/// Map a provider payment status onto the settlement lifecycle.
///
/// Unknown statuses are treated as still pending.
pub fn map_provider_status(status: &str) -> PaymentStatus {
    match status.trim().to_lowercase().as_str() {
        "approved" => PaymentStatus::Settled,
        "rejected" | "cancelled" | "refunded" | "charged_back" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}
