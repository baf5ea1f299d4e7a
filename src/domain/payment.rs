//! Payment aggregate and its settlement state machine.

use super::events::PaymentStatusChanged;
use super::tax_id::TaxId;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Settlement lifecycle of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Settled | PaymentStatus::Failed)
    }

    /// Whether moving from `self` to `to` is permitted. Same-state moves are allowed no-ops.
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        *self == to || (*self == PaymentStatus::Pending && to.is_terminal())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Settled => "SETTLED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SETTLED" => Ok(PaymentStatus::Settled),
            "FAILED" | "FAIL" => Ok(PaymentStatus::Failed),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

/// How the payer funds the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Instant bank transfer; no third-party settlement step.
    #[serde(alias = "PIX")]
    InstantTransfer,
    /// Card charge settled asynchronously by the external provider.
    #[serde(alias = "CREDIT_CARD")]
    CardCharge,
}

impl PaymentMethod {
    pub fn requires_settlement(&self) -> bool {
        matches!(self, PaymentMethod::CardCharge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::InstantTransfer => "INSTANT_TRANSFER",
            PaymentMethod::CardCharge => "CARD_CHARGE",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSTANT_TRANSFER" | "PIX" => Ok(PaymentMethod::InstantTransfer),
            "CARD_CHARGE" | "CREDIT_CARD" => Ok(PaymentMethod::CardCharge),
            _ => Err(format!("Unknown payment method: {}", s)),
        }
    }
}

/// Rejected status change, e.g. `from SETTLED to FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub tax_id: TaxId,
    pub description: String,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// New payment in `PENDING` with a fresh id.
    pub fn new(
        tax_id: TaxId,
        description: impl Into<String>,
        amount: BigDecimal,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), tax_id, description, amount, method, now)
    }

    pub fn with_id(
        id: Uuid,
        tax_id: TaxId,
        description: impl Into<String>,
        amount: BigDecimal,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tax_id,
            description: description.into(),
            amount,
            method,
            status: PaymentStatus::Pending,
            provider_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change.
    ///
    /// Returns the domain event for a real transition, `None` for a same-state
    /// no-op (which leaves `updated_at` untouched).
    pub fn transition_to(
        &mut self,
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentStatusChanged>, InvalidTransition> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(InvalidTransition { from, to });
        }
        if from == to {
            return Ok(None);
        }

        self.status = to;
        self.updated_at = now;

        Ok(Some(PaymentStatusChanged {
            payment_id: self.id,
            old_status: from,
            new_status: to,
            changed_at: now,
        }))
    }

    /// Record the provider reference. Returns whether the field changed.
    pub fn set_provider_ref(&mut self, provider_ref: impl Into<String>, now: DateTime<Utc>) -> bool {
        let provider_ref = provider_ref.into();
        if self.provider_ref.as_deref() == Some(provider_ref.as_str()) {
            return false;
        }
        self.provider_ref = Some(provider_ref);
        self.updated_at = now;
        true
    }
}
