use super::payment::{Payment, PaymentMethod, PaymentStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted by [`Payment::transition_to`] on a real status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusChanged {
    pub payment_id: Uuid,
    pub old_status: PaymentStatus,
    pub new_status: PaymentStatus,
    pub changed_at: DateTime<Utc>,
}

/// Routing key of an outbound payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentEventKind {
    #[serde(rename = "payment.created")]
    Created,
    #[serde(rename = "payment.status.changed")]
    StatusChanged,
}

impl PaymentEventKind {
    pub fn routing_key(&self) -> &'static str {
        match self {
            PaymentEventKind::Created => "payment.created",
            PaymentEventKind::StatusChanged => "payment.status.changed",
        }
    }
}

/// Broker payload for both event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEventPayload {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<PaymentStatus>,
    pub amount: BigDecimal,
    pub tax_id: String,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEventPayload {
    pub fn created(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            status: payment.status,
            previous_status: None,
            amount: payment.amount.clone(),
            tax_id: payment.tax_id.to_string(),
            method: payment.method,
            provider_ref: payment.provider_ref.clone(),
            timestamp: payment.created_at,
        }
    }

    pub fn status_changed(payment: &Payment, change: &PaymentStatusChanged) -> Self {
        Self {
            payment_id: payment.id,
            status: change.new_status,
            previous_status: Some(change.old_status),
            amount: payment.amount.clone(),
            tax_id: payment.tax_id.to_string(),
            method: payment.method,
            provider_ref: payment.provider_ref.clone(),
            timestamp: change.changed_at,
        }
    }
}
