//! Settlement activities backed by the payment repository, the charge
//! provider and the event publisher.

use super::error::ActivityError;
use super::settlement::{FinalizeOutcome, SettlementActivities, SettlementInput};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::PaymentRepository;
use crate::domain::{
    Payment, PaymentEventKind, PaymentEventPayload, PaymentMethod, PaymentStatus,
    PaymentStatusChanged,
};
use crate::events::{publish_best_effort, EventPublisher};
use crate::payments::{ChargeProvider, ChargeRequest, ChargeResponse, PaymentError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl From<DatabaseError> for ActivityError {
    fn from(err: DatabaseError) -> Self {
        ActivityError {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<PaymentError> for ActivityError {
    fn from(err: PaymentError) -> Self {
        ActivityError {
            retryable: !matches!(err, PaymentError::ValidationError { .. }),
            message: err.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentActivities {
    payments: Arc<dyn PaymentRepository>,
    provider: Arc<dyn ChargeProvider>,
    events: Arc<dyn EventPublisher>,
}

impl PaymentActivities {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        provider: Arc<dyn ChargeProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            payments,
            provider,
            events,
        }
    }

    async fn load(&self, payment_id: Uuid) -> Result<Payment, ActivityError> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| ActivityError::non_retryable(format!("payment {} not found", payment_id)))
    }
}

#[async_trait]
impl SettlementActivities for PaymentActivities {
    async fn record_pending(&self, input: &SettlementInput) -> Result<(), ActivityError> {
        let payment = Payment::with_id(
            input.payment_id,
            input.tax_id.clone(),
            input.description.clone(),
            input.amount.clone(),
            PaymentMethod::CardCharge,
            Utc::now(),
        );

        match self.payments.save(&payment).await {
            Ok(_) => {
                debug!(payment_id = %input.payment_id, "pending payment recorded");
                Ok(())
            }
            Err(DatabaseError {
                kind: DatabaseErrorKind::Duplicate { .. },
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_charge(&self, input: &SettlementInput) -> Result<ChargeResponse, ActivityError> {
        let response = self
            .provider
            .open_charge(ChargeRequest {
                amount: input.amount.clone(),
                description: input.description.clone(),
                idempotency_key: input.idempotency_key.clone(),
                tax_id: Some(input.tax_id.clone()),
            })
            .await?;

        info!(
            payment_id = %input.payment_id,
            provider = %self.provider.name(),
            provider_ref = %response.provider_ref,
            "provider charge opened"
        );
        Ok(response)
    }

    async fn attach_provider_ref(
        &self,
        payment_id: Uuid,
        provider_ref: &str,
    ) -> Result<(), ActivityError> {
        self.payments
            .attach_provider_ref(payment_id, provider_ref, Utc::now())
            .await?;
        Ok(())
    }

    async fn check_status(
        &self,
        input: &SettlementInput,
    ) -> Result<Option<PaymentStatus>, ActivityError> {
        match self.provider.charge_status(&input.idempotency_key).await {
            Ok(lookup) => Ok(lookup.map(|l| l.status)),
            Err(e) => {
                warn!(payment_id = %input.payment_id, error = %e, "provider status check failed");
                Ok(None)
            }
        }
    }

    async fn finalize(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> Result<FinalizeOutcome, ActivityError> {
        let mut payment = self.load(payment_id).await?;

        let change = match payment.transition_to(status, Utc::now()) {
            Ok(change) => change,
            Err(e) => {
                warn!(payment_id = %payment_id, error = %e, "payment already finalized");
                return Ok(FinalizeOutcome {
                    status: payment.status,
                    change: None,
                });
            }
        };

        let Some(change) = change else {
            return Ok(FinalizeOutcome { status, change: None });
        };

        match self.payments.update(&payment).await {
            Ok(_) => Ok(FinalizeOutcome {
                status,
                change: Some(change),
            }),
            Err(DatabaseError {
                kind: DatabaseErrorKind::StaleWrite { .. },
            }) => {
                let current = self.load(payment_id).await?;
                warn!(
                    payment_id = %payment_id,
                    status = %current.status,
                    "payment finalized concurrently"
                );
                Ok(FinalizeOutcome {
                    status: current.status,
                    change: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish_status_change(&self, change: &PaymentStatusChanged) -> Result<(), ActivityError> {
        let payment = self.load(change.payment_id).await?;
        let payload = PaymentEventPayload::status_changed(&payment, change);
        publish_best_effort(self.events.as_ref(), PaymentEventKind::StatusChanged, &payload).await;
        Ok(())
    }
}
